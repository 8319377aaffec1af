//! Slash-command surface
//!
//! Handles the `/register`, `/unregister`, `/list`, `/example`, and
//! `/help` application commands. Registration commands are the only
//! path that mutates the registry.

use crate::base::{ChannelError, Messenger, Result};
use crate::rest::RestClient;
use courier_core::registry::{Registry, Target, TargetKind};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Interaction type APPLICATION_COMMAND
const APPLICATION_COMMAND: u64 = 2;

/// An INTERACTION_CREATE dispatch, reduced to the fields the command
/// surface needs
#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub application_id: String,
    pub token: String,
    #[serde(rename = "type")]
    pub kind: u64,
    #[serde(default)]
    pub data: Option<InteractionData>,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Present for guild interactions
    #[serde(default)]
    pub member: Option<Member>,
    /// Present for DM interactions
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionData {
    pub name: String,
    #[serde(default)]
    pub options: Vec<CommandOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandOption {
    pub name: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    pub user: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
}

impl Interaction {
    /// Whether the command was invoked in a direct message
    pub fn is_dm(&self) -> bool {
        self.guild_id.is_none()
    }

    /// The invoking user, wherever Discord put it
    pub fn invoker(&self) -> Option<&User> {
        self.member
            .as_ref()
            .map(|m| &m.user)
            .or(self.user.as_ref())
    }

    fn option(&self, name: &str) -> Option<&str> {
        self.data
            .as_ref()?
            .options
            .iter()
            .find(|o| o.name == name)
            .and_then(|o| o.value.as_ref())
            .and_then(|v| v.as_str())
    }
}

/// Global application command definitions
pub fn command_definitions() -> serde_json::Value {
    json!([
        {
            "name": "register",
            "description": "Register yourself (in DM) or channel with a name for notifications",
            "options": [{
                "name": "name",
                "description": "The name you want to register with",
                "type": 3,
                "required": true
            }]
        },
        {
            "name": "unregister",
            "description": "Unregister yourself or this channel"
        },
        {
            "name": "list",
            "description": "List all registered users and channels"
        },
        {
            "name": "example",
            "description": "Show an example of the MQTT payload format"
        },
        {
            "name": "help",
            "description": "Show help information"
        }
    ])
}

/// Bulk-overwrite the application's global slash commands
pub async fn sync_commands(rest: &RestClient, application_id: &str) -> Result<()> {
    rest.set_global_commands(application_id, &command_definitions())
        .await
}

/// Handle one INTERACTION_CREATE dispatch. Failures are logged here and
/// never propagate into the gateway read loop.
pub async fn handle_interaction(
    rest: &RestClient,
    registry: &Arc<RwLock<Registry>>,
    topic: &str,
    payload: serde_json::Value,
) {
    let interaction: Interaction = match serde_json::from_value(payload) {
        Ok(interaction) => interaction,
        Err(e) => {
            warn!("Unparsable interaction payload: {}", e);
            return;
        }
    };

    if interaction.kind != APPLICATION_COMMAND {
        return;
    }
    let Some(name) = interaction.data.as_ref().map(|d| d.name.clone()) else {
        return;
    };

    let result = match name.as_str() {
        "register" => handle_register(rest, registry, &interaction).await,
        "unregister" => handle_unregister(rest, registry, &interaction).await,
        "list" => handle_list(rest, registry, &interaction).await,
        "example" => handle_example(rest, topic, &interaction).await,
        "help" => handle_help(rest, &interaction).await,
        other => {
            warn!("Unknown command: /{}", other);
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("Error handling /{} command: {}", name, e);
    }
}

async fn handle_register(
    rest: &RestClient,
    registry: &Arc<RwLock<Registry>>,
    interaction: &Interaction,
) -> Result<()> {
    let Some(alias) = interaction.option("name") else {
        return Err(ChannelError::Error(
            "register interaction missing name option".to_string(),
        ));
    };
    let Some(invoker) = interaction.invoker() else {
        return Err(ChannelError::Error(
            "interaction missing invoking user".to_string(),
        ));
    };

    // A DM registers the invoking user; a guild channel registers the
    // channel itself. The kind is stored so delivery never has to guess.
    let (target, scope) = if interaction.is_dm() {
        (Target::user(invoker.id.clone()), "user")
    } else {
        let channel_id = interaction.channel_id.clone().unwrap_or_default();
        (Target::channel(channel_id), "channel")
    };

    let existing = {
        let registry = registry.read().await;
        registry.alias_for(&target.id).map(str::to_string)
    };
    if let Some(existing) = existing {
        let reply = format!(
            "❌ This {} is already registered as `{}`. Unregister first with `/unregister`",
            scope, existing
        );
        return rest
            .create_interaction_response(&interaction.id, &interaction.token, &reply, true)
            .await;
    }

    let registered = registry.write().await.register(alias, target.clone());
    if registered {
        let reply = match target.kind {
            TargetKind::User => format!("✅ Successfully registered you as `{}`", alias),
            TargetKind::Channel => {
                format!("✅ Successfully registered this channel as `{}`", alias)
            }
        };
        match target.kind {
            TargetKind::User => {
                info!("User {} ({}) registered as {}", invoker.username, target.id, alias)
            }
            TargetKind::Channel => info!("Channel {} registered as {}", target.id, alias),
        }
        rest.create_interaction_response(&interaction.id, &interaction.token, &reply, false)
            .await
    } else {
        let reply = format!(
            "❌ Name `{}` is already taken. Please choose a different name.",
            alias
        );
        rest.create_interaction_response(&interaction.id, &interaction.token, &reply, true)
            .await
    }
}

async fn handle_unregister(
    rest: &RestClient,
    registry: &Arc<RwLock<Registry>>,
    interaction: &Interaction,
) -> Result<()> {
    let user_id = interaction.invoker().map(|u| u.id.clone()).unwrap_or_default();
    let channel_id = interaction.channel_id.clone().unwrap_or_default();

    // The invoking user wins when both the user and the channel are
    // registered
    let (user_alias, channel_alias) = {
        let registry = registry.read().await;
        (
            registry.alias_for(&user_id).map(str::to_string),
            registry.alias_for(&channel_id).map(str::to_string),
        )
    };

    if let Some(alias) = user_alias {
        registry.write().await.unregister(&alias);
        info!("User {} unregistered from {}", user_id, alias);
        let reply = format!("✅ Successfully unregistered `{}`", alias);
        rest.create_interaction_response(&interaction.id, &interaction.token, &reply, false)
            .await
    } else if let Some(alias) = channel_alias {
        registry.write().await.unregister(&alias);
        info!("Channel {} unregistered from {}", channel_id, alias);
        let reply = format!("✅ Successfully unregistered channel `{}`", alias);
        rest.create_interaction_response(&interaction.id, &interaction.token, &reply, false)
            .await
    } else {
        rest.create_interaction_response(
            &interaction.id,
            &interaction.token,
            "❌ You or this channel are not registered.",
            true,
        )
        .await
    }
}

async fn handle_list(
    rest: &RestClient,
    registry: &Arc<RwLock<Registry>>,
    interaction: &Interaction,
) -> Result<()> {
    let entries = registry.read().await.all();

    if entries.is_empty() {
        return rest
            .create_interaction_response(
                &interaction.id,
                &interaction.token,
                "📋 No registrations found.",
                true,
            )
            .await;
    }

    // Name lookups hit the REST API, so acknowledge first and follow up
    rest.defer_interaction(&interaction.id, &interaction.token, true)
        .await?;

    let mut users = Vec::new();
    let mut channels = Vec::new();
    for (alias, target) in &entries {
        match target.kind {
            TargetKind::User => {
                let label = rest
                    .user_label(&target.id)
                    .await
                    .unwrap_or_else(|| "Unknown/Deleted".to_string());
                users.push(format!("• `{}` → @{}\n", alias, label));
            }
            TargetKind::Channel => {
                let label = rest
                    .channel_label(&target.id)
                    .await
                    .unwrap_or_else(|| "Unknown/Deleted".to_string());
                channels.push(format!("• `{}` → #{}\n", alias, label));
            }
        }
    }

    let mut message = String::from("📋 **Registered Names:**\n");
    if !users.is_empty() {
        message.push_str("\n**👤 Users:**\n");
        for line in &users {
            message.push_str(line);
        }
    }
    if !channels.is_empty() {
        message.push_str("\n**💬 Channels:**\n");
        for line in &channels {
            message.push_str(line);
        }
    }

    rest.create_followup(&interaction.application_id, &interaction.token, &message, true)
        .await
}

async fn handle_example(rest: &RestClient, topic: &str, interaction: &Interaction) -> Result<()> {
    let example = format!(
        r#"
📨 **MQTT Message Example**

**Topic:** `{topic}`

**Payload (JSON):**
```json
{{
  "target_id": "your_registered_name",
  "message": "The front door has been opened.",
  "source": "Front Door Sensor"
}}
```

**Example using mosquitto_pub:**
```bash
mosquitto_pub -h <broker> -u <username> -P <password> \
  -t "{topic}" \
  -m '{{"target_id": "your_name", "message": "Hello from MQTT!", "source": "Test"}}'
```

**Fields:**
• `target_id` - The registered name (user or channel)
• `message` - The message content to send
• `source` - Where the message is coming from (optional, defaults to "Unknown")
"#,
        topic = topic
    );
    rest.create_interaction_response(&interaction.id, &interaction.token, &example, true)
        .await
}

async fn handle_help(rest: &RestClient, interaction: &Interaction) -> Result<()> {
    let help_text = r#"
🤖 **Discord MQTT Bot - Help**

**Registration:**
• `/register <name>` - Register yourself (in DM) or channel (in server) with a name
• `/unregister` - Unregister yourself or current channel
• `/list` - List all registered users and channels with their Discord names

**Information:**
• `/example` - Show MQTT payload example
• `/help` - Show this help message

**How it works:**
1. Use `/register` in a DM to register yourself, or in a channel to register that channel
2. External services send MQTT messages to the bot
3. Bot relays messages to registered users/channels
4. Names are shared between users and channels (no duplicates)

**Notes:**
• Only one name per user/channel
• Names must be unique across all registrations
• Messages persist through bot restarts
"#;
    rest.create_interaction_response(&interaction.id, &interaction.token, help_text, true)
        .await
}
