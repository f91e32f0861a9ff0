//! Error types for discovery

use thiserror::Error;

/// Discovery error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The coordination store could not be reached or the session broke
    #[error("Session error: {0}")]
    Session(String),

    #[error("Failed to list children of {path}: {message}")]
    Listing { path: String, message: String },

    #[error("No such node: {0}")]
    NoNode(String),

    #[error("Failed to decode {path}: {message}")]
    Decode { path: String, message: String },

    #[error("Health probe error: {0}")]
    Probe(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Discovery cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the error concerns a single node rather than the whole pass
    #[must_use]
    pub fn is_node_level(&self) -> bool {
        matches!(self, Self::NoNode(_) | Self::Decode { .. })
    }
}

/// Result type for discovery operations
pub type Result<T> = std::result::Result<T, Error>;
