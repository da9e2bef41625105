//! SwarmClient trait for mocking
//!
//! This trait abstracts the SwarmClient to enable mocking in unit tests.
//! The concrete SwarmClient implements this trait, and tests can use mock implementations.

use crate::error::SwarmError;
use crate::models::*;

/// Trait for Swarm manager API operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Filters are `(key, value)` pairs; repeated keys are OR-ed by the manager.
#[async_trait::async_trait]
pub trait SwarmClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Check that the manager is reachable
    async fn ping(&self) -> Result<(), SwarmError>;

    // Nodes
    async fn list_nodes(&self) -> Result<Vec<Node>, SwarmError>;

    // Services
    async fn list_services(&self, filters: &[(&str, &str)]) -> Result<Vec<Service>, SwarmError>;
    async fn inspect_service(&self, name: &str) -> Result<Service, SwarmError>;
    async fn create_service(&self, spec: &ServiceSpec) -> Result<ServiceCreateResponse, SwarmError>;
    async fn update_service(&self, id: &str, version: u64, spec: &ServiceSpec) -> Result<(), SwarmError>;
    async fn remove_service(&self, name: &str) -> Result<(), SwarmError>;

    // Tasks
    async fn list_tasks(&self, filters: &[(&str, &str)]) -> Result<Vec<Task>, SwarmError>;
}
