//! Configuration loading and management
//!
//! Configuration is assembled in layers: compiled-in defaults, then
//! `config.json`, then the well-known environment aliases, then
//! `COURIER__`-prefixed path overrides. Later layers win.

use super::schema::Config;
use super::validate::validate_config;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Configuration loader
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Create a new config loader with the default config directory
    pub fn new() -> Self {
        let config_dir = dirs::home_dir()
            .map(|h| h.join(".courier"))
            .unwrap_or_else(|| PathBuf::from(".courier"));

        Self { config_dir }
    }

    /// Create a new config loader with a custom config directory
    pub fn with_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            config_dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Load, merge, and validate the configuration
    pub fn load(&self) -> crate::Result<Config> {
        let mut merged = serde_json::to_value(Config::default())?;

        if let Some(file_value) = self.read_config_file()? {
            deep_merge(&mut merged, file_value);
        }
        apply_alias_overrides(&mut merged);
        apply_path_overrides(&mut merged);

        let config: Config = serde_json::from_value(merged)?;
        validate_config(&config)?;
        Ok(config)
    }

    fn read_config_file(&self) -> crate::Result<Option<Value>> {
        let path = self.config_dir.join("config.json");
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let value = serde_json::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Some(value))
    }

    /// Save configuration to file
    pub fn save(&self, config: &Config) -> crate::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(self.config_dir.join("config.json"), content)?;
        Ok(())
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge `overlay` into `base`: objects merge key-by-key, anything else
/// replaces the base value outright.
fn deep_merge(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Object(overlay_map) if base.is_object() => {
            let base_map = base.as_object_mut().expect("object checked");
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        other => *base = other,
    }
}

/// Interpret an environment string: JSON first, then bool and numeric
/// forms, else a plain string.
fn env_value(raw: &str) -> Value {
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return v;
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    raw.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

/// Write `value` at the given path inside `root`, materializing
/// intermediate objects and replacing non-objects along the way.
fn set_by_path(root: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *root = value;
        return;
    };

    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    let map = root.as_object_mut().expect("object ensured");

    if rest.is_empty() {
        map.insert(head.clone(), value);
    } else {
        let child = map
            .entry(head.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        set_by_path(child, rest, value);
    }
}

/// Well-known environment variables, kept for compatibility with
/// existing deployments
fn apply_alias_overrides(config: &mut Value) {
    let aliases = [
        ("DISCORD_TOKEN", "discord.token"),
        ("MQTT_BROKER", "mqtt.broker"),
        ("MQTT_USERNAME", "mqtt.username"),
        ("MQTT_PASSWORD", "mqtt.password"),
        ("MQTT_TOPIC", "mqtt.topic"),
        ("DATA_PATH", "storage.data_dir"),
    ];

    for (env_key, target_path) in aliases {
        if let Ok(value) = std::env::var(env_key) {
            let segments: Vec<String> = target_path.split('.').map(str::to_string).collect();
            set_by_path(config, &segments, Value::String(value));
        }
    }
}

fn apply_path_overrides(config: &mut Value) {
    const PREFIX: &str = "COURIER__";
    for (key, value) in std::env::vars() {
        let Some(suffix) = key.strip_prefix(PREFIX) else {
            continue;
        };
        let segments: Vec<String> = suffix
            .split("__")
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_lowercase())
            .collect();
        if segments.is_empty() {
            continue;
        }
        set_by_path(config, &segments, env_value(&value));
    }
}
