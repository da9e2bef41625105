//! Swarm client errors

use thiserror::Error;

/// Errors that can occur when interacting with the Swarm manager API
#[derive(Debug, Error)]
pub enum SwarmError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Swarm manager returned an error
    #[error("Swarm API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Message reported by the manager, verbatim
        message: String,
    },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object version changed since it was read
    #[error("Version conflict: {0}")]
    Conflict(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
