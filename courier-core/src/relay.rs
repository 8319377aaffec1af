//! Relay message wire format
//!
//! The JSON payload external publishers put on the bus topic. `source`
//! is optional and defaults to "Unknown"; `target_id` and `message`
//! are required but tolerated as empty at decode time so the dispatcher
//! can report them as incomplete instead of failing the decode.

use serde::{Deserialize, Serialize};

fn default_source() -> String {
    "Unknown".to_string()
}

/// A message received from the bus, addressed to a registered alias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Registered alias of the recipient
    #[serde(default)]
    pub target_id: String,
    /// Message body
    #[serde(default)]
    pub message: String,
    /// Human-readable origin label
    #[serde(default = "default_source")]
    pub source: String,
}

impl RelayMessage {
    pub fn new(target_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            message: message.into(),
            source: default_source(),
        }
    }

    /// Set the source label
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Whether both required fields are present and non-empty
    pub fn is_complete(&self) -> bool {
        !self.target_id.is_empty() && !self.message.is_empty()
    }

    /// The outbound text: bolded source on the first line, the message
    /// body verbatim on the next
    pub fn formatted(&self) -> String {
        format!("**{}**\n{}", self.source, self.message)
    }
}
