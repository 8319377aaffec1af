//! CLI entry point for courier

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use courier_channels::{DiscordHandler, Dispatcher, MqttListener, RestClient};
use courier_core::config::ConfigLoader;
use courier_core::logging::init_logging;
use courier_core::registry::Registry;
use courier_core::relay::RelayMessage;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "An MQTT to Discord relay bot")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay gateway
    Gateway,
    /// Publish a test message to the relay topic
    Publish {
        /// Registered name to deliver to
        target: String,
        /// Message text
        message: String,
        /// Source line shown above the message
        #[arg(default_value = "Test Script")]
        source: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let config_loader = if let Some(dir) = cli.config_dir {
        ConfigLoader::with_dir(dir)
    } else {
        ConfigLoader::new()
    };

    match cli.command {
        Commands::Gateway => run_gateway(&config_loader).await?,
        Commands::Publish {
            target,
            message,
            source,
        } => run_publish(&config_loader, target, message, source).await?,
    }

    Ok(())
}

/// Run the relay gateway until Ctrl+C
async fn run_gateway(loader: &ConfigLoader) -> Result<()> {
    let config = loader.load()?;
    let _guard = init_logging(&config.logging);

    if config.discord.token.is_empty() {
        error!("DISCORD_TOKEN not set in environment variables");
        anyhow::bail!("Discord token is not configured");
    }

    println!("{}", style("Starting courier gateway...").bold().cyan());
    println!("Broker: {}", config.mqtt.broker);
    println!("Topic: {}", config.mqtt.topic);
    println!("Data dir: {}", config.storage.data_dir);

    info!("Bot is starting up...");

    let registry = Arc::new(RwLock::new(Registry::open(&config.storage.data_dir)));
    let rest = RestClient::new(&config.discord.token)?;

    let (relay_tx, relay_rx) = mpsc::unbounded_channel();

    // MQTT comes up first, mirrored by the shutdown order below
    let mut mqtt = MqttListener::new(config.mqtt.clone(), relay_tx);
    if let Err(e) = mqtt.start() {
        error!("Failed to start MQTT listener: {}", e);
    }

    let mut discord = DiscordHandler::new(
        &config.discord,
        config.mqtt.topic.clone(),
        Arc::clone(&registry),
        rest.clone(),
    );
    discord.start()?;

    let dispatcher = Dispatcher::new(registry, Arc::new(rest));
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(relay_rx).await;
    });

    println!(
        "\n{}",
        style("Gateway is running. Press Ctrl+C to stop.").green()
    );

    tokio::signal::ctrl_c().await?;
    info!("Bot stopped by user");
    println!("\n{}", style("Shutting down...").yellow());

    info!("Bot is shutting down...");
    mqtt.stop().await;
    discord.stop().await;

    dispatcher_handle.abort();
    let _ = dispatcher_handle.await;

    println!("{}", style("Gateway stopped.").green());
    Ok(())
}

/// Publish a single relay payload, the same shape the gateway consumes
async fn run_publish(
    loader: &ConfigLoader,
    target: String,
    message: String,
    source: String,
) -> Result<()> {
    let config = loader.load()?;
    let msg = RelayMessage::new(target, message).with_source(source);

    let (host, port) = config.mqtt.host_port();
    println!("📤 Sending message to {}...", msg.target_id);
    println!("   Topic: {}", config.mqtt.topic);
    println!("   Broker: {}:{}", host, port);
    println!("   Payload: {}", serde_json::to_string_pretty(&msg)?);

    match courier_channels::mqtt::publish_once(&config.mqtt, &msg).await {
        Ok(()) => {
            println!("{}", style("✅ Message sent successfully!").green());
            Ok(())
        }
        Err(e) => {
            println!("{}", style(format!("❌ Error sending message: {}", e)).red());
            std::process::exit(1);
        }
    }
}
