//! Configuration validation rules.

use super::schema::Config;

/// Validate configuration and return aggregated validation errors.
///
/// The Discord token is deliberately not checked here; only the gateway
/// needs it and enforces it at startup.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.mqtt.topic.trim().is_empty() {
        errors.push("mqtt.topic must not be empty".to_string());
    }
    let (host, port) = config.mqtt.split_addr();
    if host.trim().is_empty() {
        errors.push("mqtt.broker must include a host".to_string());
    }
    if let Some(port) = port {
        if port.parse::<u16>().is_err() {
            errors.push(format!("mqtt.broker has an invalid port '{}'", port));
        }
    }
    if config.mqtt.client_id.trim().is_empty() {
        errors.push("mqtt.client_id must not be empty".to_string());
    }
    if config.mqtt.keep_alive_secs == 0 {
        errors.push("mqtt.keep_alive_secs must be > 0".to_string());
    }

    if config.discord.gateway_url.trim().is_empty() {
        errors.push("discord.gateway_url must not be empty".to_string());
    }

    if config.storage.data_dir.trim().is_empty() {
        errors.push("storage.data_dir must not be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}
