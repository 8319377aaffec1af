//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration for courier
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// MQTT broker configuration
    #[serde(default)]
    pub mqtt: MqttConfig,
    /// Discord configuration
    #[serde(default)]
    pub discord: DiscordConfig,
    /// Durable storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// MQTT broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker address, `mqtt://host:port` or bare `host[:port]`
    #[serde(default = "default_mqtt_broker")]
    pub broker: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Topic the relay subscribes to
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    /// Client identifier presented to the broker
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,
    /// Keep-alive interval in seconds
    #[serde(default = "default_mqtt_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_mqtt_broker() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_mqtt_topic() -> String {
    "/home/discord-bot/messages".to_string()
}

fn default_mqtt_client_id() -> String {
    "courier".to_string()
}

fn default_mqtt_keep_alive() -> u64 {
    60
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: default_mqtt_broker(),
            username: String::new(),
            password: String::new(),
            topic: default_mqtt_topic(),
            client_id: default_mqtt_client_id(),
            keep_alive_secs: default_mqtt_keep_alive(),
        }
    }
}

impl MqttConfig {
    /// Strip any `mqtt://` or `mqtts://` scheme prefix from the broker
    /// address and split it into host and an optional port string.
    pub(super) fn split_addr(&self) -> (&str, Option<&str>) {
        let addr = self.broker.trim();
        let addr = addr
            .strip_prefix("mqtt://")
            .or_else(|| addr.strip_prefix("mqtts://"))
            .unwrap_or(addr);
        match addr.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (addr, None),
        }
    }

    /// Split the broker address into host and port, stripping any
    /// scheme prefix. Missing ports fall back to 1883; unparsable
    /// ports do too, but validation rejects those at load time.
    pub fn host_port(&self) -> (String, u16) {
        let (host, port) = self.split_addr();
        let port = port.and_then(|p| p.parse().ok()).unwrap_or(1883);
        (host.to_string(), port)
    }

    /// Credentials to present to the broker, or `None` to connect
    /// anonymously. Both username and password must be set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() || self.password.is_empty() {
            None
        } else {
            Some((self.username.as_str(), self.password.as_str()))
        }
    }
}

/// Discord configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot token; required to run the gateway
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_discord_gateway")]
    pub gateway_url: String,
    #[serde(default = "default_discord_intents")]
    pub intents: u64,
}

fn default_discord_gateway() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".to_string()
}

fn default_discord_intents() -> u64 {
    37377 // GUILDS + GUILD_MESSAGES + DIRECT_MESSAGES + MESSAGE_CONTENT
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            gateway_url: default_discord_gateway(),
            intents: default_discord_intents(),
        }
    }
}

/// Durable storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the registry file
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level filter; RUST_LOG wins over this when set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format, `text` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory the rolled log files land in
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Per-module level overrides, e.g. `"rumqttc": "warn"`
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.mqtt.broker, "mqtt://localhost:1883");
        assert_eq!(config.mqtt.topic, "/home/discord-bot/messages");
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert_eq!(config.storage.data_dir, "./data");
        assert_eq!(config.discord.intents, 37377);
        assert!(config.discord.token.is_empty());
    }

    #[test]
    fn test_host_port_strips_scheme() {
        let mut mqtt = MqttConfig::default();
        assert_eq!(mqtt.host_port(), ("localhost".to_string(), 1883));

        mqtt.broker = "mqtts://broker.example.com:8883".to_string();
        assert_eq!(mqtt.host_port(), ("broker.example.com".to_string(), 8883));

        mqtt.broker = "10.0.0.5".to_string();
        assert_eq!(mqtt.host_port(), ("10.0.0.5".to_string(), 1883));

        mqtt.broker = "broker:not-a-port".to_string();
        assert_eq!(mqtt.host_port(), ("broker".to_string(), 1883));
    }

    #[test]
    fn test_credentials_require_both_parts() {
        let mut mqtt = MqttConfig::default();
        assert!(mqtt.credentials().is_none());

        mqtt.username = "relay".to_string();
        assert!(mqtt.credentials().is_none());

        mqtt.password = "secret".to_string();
        assert_eq!(mqtt.credentials(), Some(("relay", "secret")));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"mqtt": {"broker": "mqtt://broker.lan:1883"}}"#).unwrap();
        assert_eq!(config.mqtt.broker, "mqtt://broker.lan:1883");
        assert_eq!(config.mqtt.topic, "/home/discord-bot/messages");
        assert_eq!(config.logging.level, "info");
    }
}
