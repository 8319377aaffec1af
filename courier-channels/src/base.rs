//! Shared channel plumbing

use async_trait::async_trait;

/// Channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel error: {0}")]
    Error(String),

    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Send error: {0}")]
    SendError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Outbound surface of the chat platform as the dispatcher and command
/// surface see it. Implemented by the Discord REST client; tests swap
/// in recording fakes.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Deliver `text` to a user as a direct message
    async fn send_user(&self, user_id: &str, text: &str) -> Result<()>;

    /// Deliver `text` to a guild text channel
    async fn send_channel(&self, channel_id: &str, text: &str) -> Result<()>;

    /// Display label for a user, `None` when the user cannot be fetched
    async fn user_label(&self, user_id: &str) -> Option<String>;

    /// Display label for a channel, `None` when it cannot be fetched
    async fn channel_label(&self, channel_id: &str) -> Option<String>;
}
