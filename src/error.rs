//! Error types for Beacon call

use thiserror::Error;

/// Result type alias for Beacon call operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Beacon call
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech recognizer error
    #[error("recognizer error: {0}")]
    Recognizer(String),

    /// Realtime session error
    #[error("realtime error: {0}")]
    Realtime(String),

    /// Audio subscriber rejected a chunk
    #[error("subscriber error: {0}")]
    Subscriber(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
