//! Configuration Module
//!
//! Configuration loading for the connector.

mod settings;

pub use settings::{ConfigError, ConnectorConfig, ServerSettings};
