//! Messaging integrations for courier
//!
//! This crate connects the MQTT side to the Discord side: the listener,
//! the dispatcher, the gateway session and the REST client live here.

pub mod base;
pub mod commands;
pub mod discord;
pub mod dispatcher;
pub mod mqtt;
pub mod rest;

pub use base::{ChannelError, Messenger, Result};
pub use discord::DiscordHandler;
pub use dispatcher::Dispatcher;
pub use mqtt::MqttListener;
pub use rest::RestClient;
