//! deployd model
//!
//! Declarative pod-group specifications, observed-state reports and the
//! collaborator interfaces shared by every cluster backend.
//!
//! - `spec`: desired state (`PodGroupSpec`, `PodSpec`, `ContainerSpec`)
//! - `pod_group`: observed state (`PodGroup`, `Pod`, `Container`, `Node`)
//! - `naming`: object-name sanitization and the label selector triple
//! - `store`: the desired-state key/value store contract
//! - `error_spec`: records consumed by the network-error recovery handler

pub mod error_spec;
pub mod naming;
pub mod pod_group;
pub mod spec;
pub mod store;

pub use error_spec::ErrorSpec;
pub use naming::*;
pub use pod_group::*;
pub use spec::*;
pub use store::{MemoryStore, Store, StoreError, get_json, pod_group_key, set_json};
