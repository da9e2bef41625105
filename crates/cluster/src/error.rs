//! Reconciliation errors
//!
//! Every backend failure is surfaced through [`ClusterError`]; backend messages
//! are carried verbatim so callers can match on them.

use model::ValidationError;
use std::time::Duration;
use swarm_client::SwarmError;
use thiserror::Error;

/// Errors returned by the cluster facade and its controllers
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Spec rejected before any backend call
    #[error("Invalid pod group spec: {0}")]
    Validation(#[from] ValidationError),

    /// Kubernetes transport or client error
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    /// Kubernetes API server refused the request
    #[error("{kind} {name} rejected ({code}): {message}")]
    Rejected {
        /// Object kind
        kind: &'static str,
        /// Object name
        name: String,
        /// HTTP status code
        code: u16,
        /// Message reported by the API server, verbatim
        message: String,
    },

    /// Swarm manager error
    #[error("Swarm error: {0}")]
    Swarm(#[from] SwarmError),

    /// Remote object absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Pods did not converge before the deadline
    #[error("{name} did not converge: {observed}/{desired} instances after {elapsed:?}")]
    ConvergenceTimeout {
        /// Pod-group name
        name: String,
        /// Desired instance count
        desired: u32,
        /// Instances observed at the last poll
        observed: u32,
        /// Time spent waiting
        elapsed: Duration,
    },

    /// Shutdown requested while waiting
    #[error("Wait for {0} cancelled")]
    Cancelled(String),

    /// Object changed between read and write, twice
    #[error("{kind} {name} was modified concurrently")]
    RaceLost {
        /// Object kind
        kind: &'static str,
        /// Object name
        name: String,
    },
}

impl ClusterError {
    /// Classify a kube error for an object of `kind` named `name`.
    ///
    /// 404 becomes [`ClusterError::NotFound`], a 409 with reason `Conflict`
    /// (stale resourceVersion) becomes [`ClusterError::RaceLost`], every other
    /// API error, `AlreadyExists` included, keeps its message in
    /// [`ClusterError::Rejected`].
    pub fn from_kube(kind: &'static str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(e) => Self::from_status(kind, name, e.code, &e.reason, e.message.clone()),
            other => Self::Kube(other),
        }
    }

    fn from_status(kind: &'static str, name: &str, code: u16, reason: &str, message: String) -> Self {
        match (code, reason) {
            (404, _) => Self::NotFound(format!("{kind} {name}")),
            (409, "Conflict") => Self::RaceLost {
                kind,
                name: name.to_string(),
            },
            _ => Self::Rejected {
                kind,
                name: name.to_string(),
                code,
                message,
            },
        }
    }

    /// Whether the error means the object does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Swarm(SwarmError::NotFound(_)))
    }

    /// Whether the error is a lost optimistic-concurrency race
    #[must_use]
    pub fn is_race_lost(&self) -> bool {
        matches!(self, Self::RaceLost { .. } | Self::Swarm(SwarmError::Conflict(_)))
    }
}
