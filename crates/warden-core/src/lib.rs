//! Configuration for the Warden tool mediator.

pub mod config;

pub use config::{Config, ConfigError};
