//! Daemon error types.
//!
//! Mistakes in the environment or on the command line. Backend and store
//! failures keep their library error types and reach `main` through `anyhow`.

use thiserror::Error;

/// Errors raised before any backend call is made
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unknown command or wrong arguments
    #[error("Usage error: {0}\n\nusage: deployd <create|inspect|patch|remove> <spec.yaml>\n       deployd list [--all] [key=value ...]\n       deployd resources")]
    Usage(String),
}
