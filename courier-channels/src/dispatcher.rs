//! Relay message dispatch
//!
//! Bridges the bus listener to Discord: validates each decoded payload,
//! resolves the alias through the registry, and makes exactly one send
//! attempt to the registered target. Registrations carry their kind, so
//! delivery goes straight to a DM or a channel without probing.

use crate::base::Messenger;
use courier_core::registry::{Registry, TargetKind};
use courier_core::relay::RelayMessage;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info};

/// Resolves relay messages and delivers them
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<RwLock<Registry>>,
    messenger: Arc<dyn Messenger>,
}

impl Dispatcher {
    pub fn new(registry: Arc<RwLock<Registry>>, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            registry,
            messenger,
        }
    }

    /// Consume relay messages until the sending side closes. Each
    /// message is handled on its own task so a slow send cannot back up
    /// the queue.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<RelayMessage>) {
        while let Some(msg) = rx.recv().await {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.dispatch(msg).await;
            });
        }
        info!("Dispatcher stopped");
    }

    /// Deliver one relay message: zero or one outbound send, with a log
    /// line for whichever way it goes
    pub async fn dispatch(&self, msg: RelayMessage) {
        if !msg.is_complete() {
            error!("Invalid payload: missing target_id or message");
            return;
        }

        let resolved = self.registry.read().await.resolve(&msg.target_id).cloned();
        let target = match resolved {
            Some(target) => target,
            None => {
                error!("Target '{}' not found in registry", msg.target_id);
                return;
            }
        };

        let text = msg.formatted();
        let outcome = match target.kind {
            TargetKind::User => self.messenger.send_user(&target.id, &text).await,
            TargetKind::Channel => self.messenger.send_channel(&target.id, &text).await,
        };

        match outcome {
            Ok(()) => match target.kind {
                TargetKind::User => info!("Sent DM to user {} ({})", msg.target_id, target.id),
                TargetKind::Channel => {
                    info!("Sent message to channel {} ({})", msg.target_id, target.id)
                }
            },
            Err(e) => error!(
                "Could not send message to {} ({}): {}",
                msg.target_id, target.id, e
            ),
        }
    }
}
