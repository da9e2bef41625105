//! Desired-state specification types
//!
//! A `PodGroupSpec` is handed to a cluster backend by the caller; this crate
//! never persists it (see [`crate::store`]).

use crate::naming;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Input rejected before any backend call is made
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Env entry without a `=` separator or with an empty key
    #[error("malformed env entry {entry:?} in container {container}: expected KEY=VALUE")]
    MalformedEnv {
        /// Index of the container in the pod spec
        container: usize,
        /// The offending entry
        entry: String,
    },

    /// Create/patch requested with zero instances
    #[error("pod group {0} must request at least one instance")]
    NoInstances(String),

    /// Pod template without containers
    #[error("pod group {0} has no containers")]
    NoContainers(String),

    /// The backend cannot express this pod shape
    #[error("unsupported pod spec for {name}: {reason}")]
    Unsupported {
        /// Pod-group name
        name: String,
        /// Why the backend cannot render it
        reason: String,
    },
}

/// Desired state of one group of identical pod instances
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodGroupSpec {
    /// Dotted hierarchical name, e.g. `hello.web.main`
    pub name: String,

    /// Application namespace
    pub namespace: String,

    /// Desired instance count
    #[serde(default)]
    pub num_instances: u32,

    /// Template shared by every instance
    pub pod: PodSpec,

    /// Ordered, stable-identity instances instead of interchangeable replicas
    #[serde(default)]
    pub stateful: bool,
}

/// Template shared by every instance in a group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSpec {
    /// Pod name (usually equal to the group name)
    pub name: String,

    /// Application namespace
    pub namespace: String,

    /// Containers, in order
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,

    /// Volume paths. Rendering volumes is not supported; kept for round-trips.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
}

/// One container of the pod template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Image reference
    pub image: String,

    /// argv override
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// `KEY=VALUE` entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Exposed TCP port, 0 = none
    #[serde(default)]
    pub expose: u16,

    /// Memory limit in bytes, 0 = unlimited
    #[serde(default)]
    pub memory_limit: i64,
}

impl ContainerSpec {
    /// Split every env entry on its first `=`.
    ///
    /// `index` is the container position, used only for error reporting.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedEnv`] for an entry without `=` or
    /// with an empty key.
    pub fn parsed_env(&self, index: usize) -> Result<Vec<(String, String)>, ValidationError> {
        self.env
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
                _ => Err(ValidationError::MalformedEnv {
                    container: index,
                    entry: entry.clone(),
                }),
            })
            .collect()
    }
}

impl PodGroupSpec {
    /// Backend-safe object name
    #[must_use]
    pub fn object_name(&self) -> String {
        naming::sanitize(&self.name)
    }

    /// Label selector string for this group's pods
    #[must_use]
    pub fn label_selector(&self) -> String {
        naming::label_selector(&self.namespace, &self.name)
    }

    /// Full label triple
    #[must_use]
    pub fn pod_labels(&self) -> BTreeMap<String, String> {
        naming::pod_labels(&self.namespace, &self.name)
    }

    /// app + proc labels
    #[must_use]
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        naming::selector_labels(&self.namespace, &self.name)
    }

    /// Annotations carrying the unsanitized identity of the group
    #[must_use]
    pub fn annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (naming::ANNOTATION_POD_GROUP.to_string(), self.name.clone()),
            (naming::ANNOTATION_NAMESPACE.to_string(), self.namespace.clone()),
        ])
    }

    /// Checks applied before create and patch.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.num_instances == 0 {
            return Err(ValidationError::NoInstances(self.name.clone()));
        }
        if self.pod.containers.is_empty() {
            return Err(ValidationError::NoContainers(self.name.clone()));
        }
        for (i, container) in self.pod.containers.iter().enumerate() {
            container.parsed_env(i)?;
        }
        Ok(())
    }
}
