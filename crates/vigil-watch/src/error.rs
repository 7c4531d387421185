//! Error types for the change-aggregation engine.

use thiserror::Error;

/// Errors that can occur during watch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Required configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A baseline scan could not record a path.
    #[error("baseline scan error: {0}")]
    Scan(String),

    /// Capability negotiation, subscription, or another transport command failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// An operation was invoked in a state that cannot serve it.
    #[error("invalid state: {0}")]
    State(String),

    /// Event plumbing between internal tasks broke down.
    #[error("channel error: {0}")]
    Channel(String),

    /// IO error during file operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for watch operations.
pub type Result<T> = std::result::Result<T, Error>;
