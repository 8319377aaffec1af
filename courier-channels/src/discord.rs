//! Discord Gateway connection
//!
//! Maintains the bot's Gateway session and routes READY and
//! INTERACTION_CREATE dispatches to the slash command layer. Outbound
//! traffic goes through the shared REST client.

use crate::base::{ChannelError, Result};
use crate::commands;
use crate::rest::RestClient;
use courier_core::config::DiscordConfig;
use courier_core::registry::Registry;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

/// Discord Gateway opcodes the bot sends or reacts to
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
enum GatewayOp {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    Reconnect = 7,
    InvalidSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
}

impl GatewayOp {
    fn from_u8(op: u8) -> Option<Self> {
        match op {
            0 => Some(GatewayOp::Dispatch),
            1 => Some(GatewayOp::Heartbeat),
            2 => Some(GatewayOp::Identify),
            7 => Some(GatewayOp::Reconnect),
            9 => Some(GatewayOp::InvalidSession),
            10 => Some(GatewayOp::Hello),
            11 => Some(GatewayOp::HeartbeatAck),
            _ => None,
        }
    }
}

/// Discord Gateway payload
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    d: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    t: Option<String>,
}

/// Discord channel handler
///
/// Owns the registry on behalf of the command surface: every interaction is
/// handled sequentially on the gateway read loop, so registry mutations never
/// race each other.
pub struct DiscordHandler {
    config: DiscordConfig,
    /// MQTT topic, shown in the /example command output
    topic: String,
    rest: RestClient,
    registry: Arc<RwLock<Registry>>,
    /// Last sequence number seen, echoed in heartbeats
    seq: Arc<Mutex<Option<u64>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    task_handle: Option<JoinHandle<()>>,
    running: bool,
}

impl DiscordHandler {
    /// Create a new Discord handler from config
    pub fn new(
        config: &DiscordConfig,
        topic: String,
        registry: Arc<RwLock<Registry>>,
        rest: RestClient,
    ) -> Self {
        Self {
            config: config.clone(),
            topic,
            rest,
            registry,
            seq: Arc::new(Mutex::new(None)),
            shutdown_tx: None,
            task_handle: None,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start the gateway connection in a background task.
    ///
    /// Fails fast when no bot token is configured; everything past that is
    /// retried inside the connection loop.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }

        if self.config.token.is_empty() {
            return Err(ChannelError::NotConfigured(
                "Discord token not configured".to_string(),
            ));
        }

        info!("Starting Discord bot...");

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let handler = self.clone_for_task();
        let handle = tokio::spawn(async move {
            handler.run_gateway(shutdown_rx).await;
        });

        self.task_handle = Some(handle);
        self.running = true;

        info!("Discord bot started");
        Ok(())
    }

    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }

        info!("Stopping Discord bot...");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }

        self.running = false;
        info!("Discord bot stopped");
    }

    /// Clone for the gateway task
    fn clone_for_task(&self) -> Self {
        Self {
            config: self.config.clone(),
            topic: self.topic.clone(),
            rest: self.rest.clone(),
            registry: Arc::clone(&self.registry),
            seq: Arc::clone(&self.seq),
            shutdown_tx: None,
            task_handle: None,
            running: true,
        }
    }

    /// Run the gateway connection until a shutdown signal arrives
    async fn run_gateway(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut reconnect_delay = 5;
        let mut running = true;

        while running {
            info!("Connecting to Discord gateway...");

            match tokio_tungstenite::connect_async(&self.config.gateway_url).await {
                Ok((ws_stream, _)) => {
                    info!("Connected to Discord gateway");
                    reconnect_delay = 5;

                    let (mut write, mut read) = ws_stream.split();

                    // Heartbeats come from a separate task, so all writes go
                    // through a channel drained by a single writer.
                    let (tx, mut rx) = mpsc::channel::<String>(32);
                    let writer_handle = tokio::spawn(async move {
                        while let Some(msg) = rx.recv().await {
                            if let Err(e) = write
                                .send(tokio_tungstenite::tungstenite::Message::Text(msg))
                                .await
                            {
                                warn!("WebSocket write failed: {}", e);
                                break;
                            }
                        }
                    });

                    loop {
                        tokio::select! {
                            _ = shutdown_rx.recv() => {
                                info!("Shutdown signal received");
                                running = false;
                                break;
                            }
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                                        // Reconnect and InvalidSession surface as
                                        // errors; drop the socket and redial.
                                        if let Err(e) = self.handle_gateway_message(&text, &tx).await {
                                            warn!("Gateway session ended: {}", e);
                                            break;
                                        }
                                    }
                                    Some(Ok(tokio_tungstenite::tungstenite::Message::Close(_))) => {
                                        warn!("Discord WebSocket closed");
                                        break;
                                    }
                                    Some(Err(e)) => {
                                        error!("Discord WebSocket error: {}", e);
                                        break;
                                    }
                                    None => {
                                        warn!("Discord WebSocket stream ended");
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }

                    writer_handle.abort();
                }
                Err(e) => {
                    warn!("Discord connection failed: {}", e);
                }
            }

            if running {
                info!("Reconnecting to Discord in {} seconds...", reconnect_delay);
                tokio::time::sleep(Duration::from_secs(reconnect_delay)).await;
                reconnect_delay = (reconnect_delay * 2).min(60);
            }
        }

        info!("Discord gateway loop ended");
    }

    async fn handle_gateway_message(&self, text: &str, tx: &mpsc::Sender<String>) -> Result<()> {
        let payload: GatewayPayload = match serde_json::from_str(text) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Unparsable gateway payload: {}", e);
                return Ok(());
            }
        };

        // Update sequence
        if let Some(s) = payload.s {
            *self.seq.lock().await = Some(s);
        }

        match GatewayOp::from_u8(payload.op) {
            Some(GatewayOp::Hello) => {
                let interval_ms = payload
                    .d
                    .as_ref()
                    .and_then(|d| d.get("heartbeat_interval"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(45_000);

                // Spawn heartbeat task; it dies with the writer channel
                let tx_hb = tx.clone();
                let seq_hb = Arc::clone(&self.seq);
                tokio::spawn(async move {
                    let mut ticker = interval(Duration::from_millis(interval_ms));
                    ticker.tick().await;

                    loop {
                        ticker.tick().await;
                        let seq = *seq_hb.lock().await;
                        let heartbeat = serde_json::json!({
                            "op": 1,
                            "d": seq
                        });
                        if tx_hb.send(heartbeat.to_string()).await.is_err() {
                            break;
                        }
                    }
                });

                // Identify
                let identify = serde_json::json!({
                    "op": 2,
                    "d": {
                        "token": self.config.token,
                        "intents": self.config.intents,
                        "properties": {
                            "os": "courier",
                            "browser": "courier",
                            "device": "courier"
                        }
                    }
                });
                tx.send(identify.to_string())
                    .await
                    .map_err(|e| ChannelError::Error(e.to_string()))?;
            }
            Some(GatewayOp::Heartbeat) => {
                // Gateway asked for an immediate heartbeat
                let seq = *self.seq.lock().await;
                let heartbeat = serde_json::json!({
                    "op": 1,
                    "d": seq
                });
                tx.send(heartbeat.to_string())
                    .await
                    .map_err(|e| ChannelError::Error(e.to_string()))?;
            }
            Some(GatewayOp::Dispatch) => match payload.t.as_deref() {
                Some("READY") => {
                    if let Some(d) = payload.d {
                        self.handle_ready(&d).await;
                    }
                }
                Some("INTERACTION_CREATE") => {
                    if let Some(d) = payload.d {
                        commands::handle_interaction(&self.rest, &self.registry, &self.topic, d)
                            .await;
                    }
                }
                _ => {}
            },
            Some(GatewayOp::Reconnect) => {
                info!("Discord requested reconnect");
                return Err(ChannelError::ConnectionError(
                    "reconnect requested".to_string(),
                ));
            }
            Some(GatewayOp::InvalidSession) => {
                warn!("Discord invalidated the session");
                return Err(ChannelError::ConnectionError(
                    "invalid session".to_string(),
                ));
            }
            _ => {}
        }

        Ok(())
    }

    /// READY carries the bot user and application id; commands are synced
    /// here because the application id is not known before identify.
    async fn handle_ready(&self, d: &serde_json::Value) {
        let username = d
            .get("user")
            .and_then(|u| u.get("username"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let user_id = d
            .get("user")
            .and_then(|u| u.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        info!("Bot logged in as {} ({})", username, user_id);
        info!("Listening to MQTT topic: {}", self.topic);

        let application_id = d
            .get("application")
            .and_then(|a| a.get("id"))
            .and_then(|v| v.as_str());
        let Some(application_id) = application_id else {
            warn!("READY payload missing application id, skipping command sync");
            return;
        };

        info!("Syncing slash commands...");
        match commands::sync_commands(&self.rest, application_id).await {
            Ok(()) => info!("Slash commands synced!"),
            Err(e) => error!("Failed to sync commands: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn handler_with(token: &str, gateway_url: &str) -> (DiscordHandler, TempDir) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(RwLock::new(Registry::open(dir.path())));
        let config = DiscordConfig {
            token: token.to_string(),
            gateway_url: gateway_url.to_string(),
            ..DiscordConfig::default()
        };
        let rest = RestClient::new(token).unwrap();
        let handler = DiscordHandler::new(&config, "/test/topic".to_string(), registry, rest);
        (handler, dir)
    }

    #[test]
    fn test_gateway_op_from_u8() {
        assert_eq!(GatewayOp::from_u8(0), Some(GatewayOp::Dispatch));
        assert_eq!(GatewayOp::from_u8(1), Some(GatewayOp::Heartbeat));
        assert_eq!(GatewayOp::from_u8(2), Some(GatewayOp::Identify));
        assert_eq!(GatewayOp::from_u8(7), Some(GatewayOp::Reconnect));
        assert_eq!(GatewayOp::from_u8(9), Some(GatewayOp::InvalidSession));
        assert_eq!(GatewayOp::from_u8(10), Some(GatewayOp::Hello));
        assert_eq!(GatewayOp::from_u8(11), Some(GatewayOp::HeartbeatAck));
        assert_eq!(GatewayOp::from_u8(4), None);
        assert_eq!(GatewayOp::from_u8(42), None);
    }

    #[test]
    fn test_gateway_payload_skips_empty_fields() {
        let payload = GatewayPayload {
            op: 1,
            d: None,
            s: None,
            t: None,
        };
        assert_eq!(serde_json::to_string(&payload).unwrap(), r#"{"op":1}"#);

        let dispatch: GatewayPayload = serde_json::from_str(
            r#"{"op":0,"d":{"content":"hi"},"s":42,"t":"INTERACTION_CREATE"}"#,
        )
        .unwrap();
        assert_eq!(dispatch.op, 0);
        assert_eq!(dispatch.s, Some(42));
        assert_eq!(dispatch.t.as_deref(), Some("INTERACTION_CREATE"));
    }

    #[tokio::test]
    async fn test_start_without_token_fails() {
        let (mut handler, _dir) = handler_with("", "ws://127.0.0.1:1");
        let err = handler.start().unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured(_)));
        assert!(!handler.is_running());
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let (mut handler, _dir) = handler_with("test-token", "ws://127.0.0.1:1");
        assert!(!handler.is_running());
        handler.stop().await;
        assert!(!handler.is_running());
    }

    #[tokio::test]
    async fn test_lifecycle_with_unreachable_gateway() {
        let (mut handler, _dir) = handler_with("test-token", "ws://127.0.0.1:1");

        handler.start().unwrap();
        assert!(handler.is_running());

        // Starting again is a no-op
        handler.start().unwrap();
        assert!(handler.is_running());

        handler.stop().await;
        assert!(!handler.is_running());

        handler.stop().await;
        assert!(!handler.is_running());
    }
}
