//! Configuration for the switchboard voice agent
//!
//! Layered loading (highest priority first): `SWITCHBOARD__`-prefixed
//! environment variables, `config/{env}.yaml`, `config/default.yaml`,
//! compiled-in defaults.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, AgentSettings, ObservabilityConfig, PersistenceConfig, RetrySettings,
    RuntimeEnvironment, ServerConfig, Settings, SttSettings, TtsSettings, TurnSettings,
    VadSettings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
