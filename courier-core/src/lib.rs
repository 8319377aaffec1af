//! Core types for courier
//!
//! This crate provides the registry, configuration, logging, and relay
//! message types shared by the other courier components.

pub mod config;
pub mod error;
pub mod logging;
pub mod registry;
pub mod relay;
pub mod utils;

pub use error::{Error, Result};
