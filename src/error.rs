//! Error types for the fleet exchange
//!
//! These are infrastructure errors (configuration, transport, shutdown).
//! Request outcomes are carried as [`crate::message::ErrorDescription`]
//! values inside completions instead.

use thiserror::Error;

/// Result type alias for fleet exchange operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the fleet exchange
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The router has shut down and accepts no more messages
    #[error("router closed")]
    RouterClosed,

    /// Remote endpoint error
    #[error("transport error: {0}")]
    Transport(String),

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
