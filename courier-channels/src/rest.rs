//! Discord REST API client
//!
//! Covers the handful of v10 endpoints the relay needs: channel
//! messages, DM channels, user and channel lookups, slash command
//! registration, and interaction responses.

use crate::base::{ChannelError, Messenger, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// MessageFlags::EPHEMERAL
const EPHEMERAL: u64 = 1 << 6;

/// Minimal view of a Discord user
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
}

impl DiscordUser {
    /// "username (Display Name)" when a distinct display name exists,
    /// plain "username" otherwise
    pub fn label(&self) -> String {
        match &self.global_name {
            Some(display) if display != &self.username => {
                format!("{} ({})", self.username, display)
            }
            _ => self.username.clone(),
        }
    }
}

/// Minimal view of a Discord channel
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordChannel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DmChannel {
    id: String,
}

/// Discord REST client
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl RestClient {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_base(DISCORD_API_BASE, token)
    }

    /// Client against a custom API base; tests point this at a local
    /// mock server
    pub fn with_base(base: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChannelError::Error(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base: base.into(),
            token: token.into(),
        })
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// Issue a JSON request, waiting out rate limits. Anything else
    /// non-successful fails immediately; this is one send attempt, not
    /// a retry loop.
    async fn send_json(
        &self,
        method: Method,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        for _ in 0..3 {
            let response = self
                .http
                .request(method.clone(), url)
                .header("Authorization", self.auth())
                .header("Content-Type", "application/json")
                .json(payload)
                .send()
                .await
                .map_err(|e| ChannelError::ApiError(format!("Request failed: {}", e)))?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(1.0);
                warn!("Discord rate limited, retrying in {}s", retry_after);
                tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;
                continue;
            }

            if status.is_success() {
                return Ok(response);
            }

            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ChannelError::ApiError(format!(
                "Discord API error: {} - {}",
                status, error_text
            )));
        }

        Err(ChannelError::ApiError(
            "Discord API error: rate limited".to_string(),
        ))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| ChannelError::ApiError(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ChannelError::ApiError(format!(
                "Discord API error: {} - {}",
                status, error_text
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ChannelError::ApiError(format!("Invalid response body: {}", e)))
    }

    /// Post a message to a channel
    pub async fn create_message(&self, channel_id: &str, content: &str) -> Result<()> {
        let url = format!("{}/channels/{}/messages", self.base, channel_id);
        self.send_json(Method::POST, &url, &json!({ "content": content }))
            .await?;
        Ok(())
    }

    /// Open (or reuse) the DM channel with a user, returning its id
    pub async fn create_dm(&self, user_id: &str) -> Result<String> {
        let url = format!("{}/users/@me/channels", self.base);
        let response = self
            .send_json(Method::POST, &url, &json!({ "recipient_id": user_id }))
            .await?;
        let dm: DmChannel = response
            .json()
            .await
            .map_err(|e| ChannelError::ApiError(format!("Invalid response body: {}", e)))?;
        Ok(dm.id)
    }

    /// Fetch a user by id
    pub async fn get_user(&self, user_id: &str) -> Result<DiscordUser> {
        self.get_json(&format!("{}/users/{}", self.base, user_id))
            .await
    }

    /// Fetch a channel by id
    pub async fn get_channel(&self, channel_id: &str) -> Result<DiscordChannel> {
        self.get_json(&format!("{}/channels/{}", self.base, channel_id))
            .await
    }

    /// Bulk-overwrite the application's global slash commands
    pub async fn set_global_commands(
        &self,
        application_id: &str,
        commands: &serde_json::Value,
    ) -> Result<()> {
        let url = format!("{}/applications/{}/commands", self.base, application_id);
        self.send_json(Method::PUT, &url, commands).await?;
        Ok(())
    }

    /// Answer an interaction with an immediate message (callback type 4)
    pub async fn create_interaction_response(
        &self,
        interaction_id: &str,
        token: &str,
        content: &str,
        ephemeral: bool,
    ) -> Result<()> {
        let url = format!(
            "{}/interactions/{}/{}/callback",
            self.base, interaction_id, token
        );
        let mut data = json!({ "content": content });
        if ephemeral {
            data["flags"] = json!(EPHEMERAL);
        }
        self.send_json(Method::POST, &url, &json!({ "type": 4, "data": data }))
            .await?;
        Ok(())
    }

    /// Acknowledge an interaction now and answer later (callback type 5)
    pub async fn defer_interaction(
        &self,
        interaction_id: &str,
        token: &str,
        ephemeral: bool,
    ) -> Result<()> {
        let url = format!(
            "{}/interactions/{}/{}/callback",
            self.base, interaction_id, token
        );
        let mut payload = json!({ "type": 5 });
        if ephemeral {
            payload["data"] = json!({ "flags": EPHEMERAL });
        }
        self.send_json(Method::POST, &url, &payload).await?;
        Ok(())
    }

    /// Send the follow-up message for a deferred interaction
    pub async fn create_followup(
        &self,
        application_id: &str,
        token: &str,
        content: &str,
        ephemeral: bool,
    ) -> Result<()> {
        let url = format!("{}/webhooks/{}/{}", self.base, application_id, token);
        let mut payload = json!({ "content": content });
        if ephemeral {
            payload["flags"] = json!(EPHEMERAL);
        }
        self.send_json(Method::POST, &url, &payload).await?;
        Ok(())
    }
}

#[async_trait]
impl Messenger for RestClient {
    async fn send_user(&self, user_id: &str, text: &str) -> Result<()> {
        let dm = self.create_dm(user_id).await?;
        self.create_message(&dm, text).await
    }

    async fn send_channel(&self, channel_id: &str, text: &str) -> Result<()> {
        self.create_message(channel_id, text).await
    }

    async fn user_label(&self, user_id: &str) -> Option<String> {
        self.get_user(user_id).await.ok().map(|user| user.label())
    }

    async fn channel_label(&self, channel_id: &str) -> Option<String> {
        self.get_channel(channel_id).await.ok().and_then(|c| c.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> RestClient {
        RestClient::with_base(server.uri(), "test-token").unwrap()
    }

    #[tokio::test]
    async fn test_create_message_posts_content_with_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/42/messages"))
            .and(header("Authorization", "Bot test-token"))
            .and(body_json(json!({ "content": "hello" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "900" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.create_message("42", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_create_dm_returns_channel_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/@me/channels"))
            .and(body_json(json!({ "recipient_id": "1001" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "dm-77" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.create_dm("1001").await.unwrap(), "dm-77");
    }

    #[tokio::test]
    async fn test_send_user_opens_dm_then_posts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/@me/channels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "dm-77" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/channels/dm-77/messages"))
            .and(body_json(json!({ "content": "**Sensor**\nping" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "901" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.send_user("1001", "**Sensor**\nping").await.unwrap();
    }

    #[tokio::test]
    async fn test_api_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/42/messages"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Unknown Channel"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.create_message("42", "hello").await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_rate_limit_waits_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/42/messages"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "0")
                    .set_body_json(json!({ "message": "You are being rate limited." })),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/channels/42/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "902" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.create_message("42", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_user_label_prefers_distinct_display_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/1001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "1001",
                "username": "alice",
                "global_name": "Alice A"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/1002"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "1002",
                "username": "bob",
                "global_name": "bob"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/1404"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Unknown User"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(
            client.user_label("1001").await,
            Some("alice (Alice A)".to_string())
        );
        assert_eq!(client.user_label("1002").await, Some("bob".to_string()));
        assert_eq!(client.user_label("1404").await, None);
    }

    #[tokio::test]
    async fn test_interaction_response_sets_ephemeral_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/interactions/int1/tok1/callback"))
            .and(body_json(json!({
                "type": 4,
                "data": { "content": "nope", "flags": 64 }
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client
            .create_interaction_response("int1", "tok1", "nope", true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_defer_then_followup() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/interactions/int2/tok2/callback"))
            .and(body_json(json!({ "type": 5, "data": { "flags": 64 } })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/webhooks/app9/tok2"))
            .and(body_json(json!({ "content": "late answer", "flags": 64 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "903" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.defer_interaction("int2", "tok2", true).await.unwrap();
        client
            .create_followup("app9", "tok2", "late answer", true)
            .await
            .unwrap();
    }
}
