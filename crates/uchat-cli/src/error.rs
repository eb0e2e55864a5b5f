//! Error handling for the UChat CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("UChat core error: {0}")]
    Core(#[from] uchat_core::UchatError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),

    #[error("Conversation failed: {0}")]
    Conversation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Address lookup failed: {0}")]
    Lookup(String),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
