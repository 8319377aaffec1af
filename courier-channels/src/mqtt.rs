//! MQTT bus listener
//!
//! Owns the broker connection, subscribes to the relay topic, decodes
//! inbound payloads, and hands them across to the dispatcher without
//! blocking the network loop. The connection is re-established by the
//! client after errors; the subscription is renewed on every ConnAck.

use crate::base::{ChannelError, Result};
use courier_core::config::MqttConfig;
use courier_core::relay::RelayMessage;
use courier_core::utils::truncate;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Delay before polling again after a connection error
const RETRY_DELAY_SECS: u64 = 5;

/// MQTT listener feeding decoded relay messages into the dispatcher
pub struct MqttListener {
    config: MqttConfig,
    relay_tx: mpsc::UnboundedSender<RelayMessage>,
    client: Option<AsyncClient>,
    task_handle: Option<JoinHandle<()>>,
    running: bool,
}

impl MqttListener {
    pub fn new(config: MqttConfig, relay_tx: mpsc::UnboundedSender<RelayMessage>) -> Self {
        Self {
            config,
            relay_tx,
            client: None,
            task_handle: None,
            running: false,
        }
    }

    /// Connect to the broker and start the receive loop
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }

        let (host, port) = self.config.host_port();
        if host.is_empty() {
            return Err(ChannelError::NotConfigured(
                "MQTT broker host is empty".to_string(),
            ));
        }

        info!("Connecting to MQTT broker at {}:{}", host, port);

        let mut options = MqttOptions::new(self.config.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        if let Some((username, password)) = self.config.credentials() {
            options.set_credentials(username.to_string(), password.to_string());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        let subscribe_client = client.clone();
        let topic = self.config.topic.clone();
        let relay_tx = self.relay_tx.clone();

        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker, subscribing to {}", topic);
                        if let Err(e) = subscribe_client
                            .subscribe(topic.as_str(), QoS::AtLeastOnce)
                            .await
                        {
                            error!("Failed to subscribe to {}: {}", topic, e);
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        handle_payload(&publish.payload, &relay_tx);
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("Disconnected from MQTT broker");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECS)).await;
                    }
                }
            }
        });

        self.client = Some(client);
        self.task_handle = Some(handle);
        self.running = true;
        Ok(())
    }

    /// Stop the receive loop and close the connection. Safe to call
    /// when the listener never started.
    pub async fn stop(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.disconnect().await;
        }
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
        if self.running {
            info!("MQTT listener stopped");
        }
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

/// Decode one payload and hand it across to the dispatcher. Decode
/// failures drop the message; the handoff never blocks the receive
/// loop.
fn handle_payload(payload: &[u8], relay_tx: &mpsc::UnboundedSender<RelayMessage>) {
    let text = String::from_utf8_lossy(payload);
    let msg: RelayMessage = match serde_json::from_str(&text) {
        Ok(msg) => msg,
        Err(e) => {
            error!("Error processing MQTT message: {}", e);
            return;
        }
    };

    info!("Received MQTT message: {}", truncate(&text, 500));

    if relay_tx.send(msg).is_err() {
        warn!("Dispatcher is gone, dropping relay message");
    }
}

/// Publish one relay message and wait for the broker acknowledgment.
/// Used by the manual test publisher, not by the gateway.
pub async fn publish_once(config: &MqttConfig, msg: &RelayMessage) -> Result<()> {
    let (host, port) = config.host_port();
    if host.is_empty() {
        return Err(ChannelError::NotConfigured(
            "MQTT broker host is empty".to_string(),
        ));
    }

    let client_id = format!("{}-pub", config.client_id);
    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    if let Some((username, password)) = config.credentials() {
        options.set_credentials(username.to_string(), password.to_string());
    }

    let payload =
        serde_json::to_vec(msg).map_err(|e| ChannelError::SendError(e.to_string()))?;

    let (client, mut eventloop) = AsyncClient::new(options, 16);
    client
        .publish(config.topic.as_str(), QoS::AtLeastOnce, false, payload)
        .await
        .map_err(|e| ChannelError::SendError(e.to_string()))?;

    // Drive the event loop until the broker acknowledges the publish
    let wait_ack = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                Ok(_) => continue,
                Err(e) => return Err(ChannelError::ConnectionError(e.to_string())),
            }
        }
    };
    match tokio::time::timeout(Duration::from_secs(10), wait_ack).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ChannelError::ConnectionError(
                "Timed out waiting for broker acknowledgment".to_string(),
            ))
        }
    }

    let _ = client.disconnect().await;
    Ok(())
}
