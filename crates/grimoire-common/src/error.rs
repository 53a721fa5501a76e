//! Error types shared across Grimoire crates

use thiserror::Error;

/// Result type alias for Grimoire operations
pub type Result<T> = std::result::Result<T, GrimoireError>;

/// Main error type for Grimoire
#[derive(Error, Debug)]
pub enum GrimoireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown sync type: {0}")]
    UnknownSyncType(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl GrimoireError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}
