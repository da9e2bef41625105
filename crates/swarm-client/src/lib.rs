//! Swarm Manager REST API Client
//!
//! A Rust client for the swarm-mode subset of the Docker Engine API.
//! Provides typed models for nodes, services and tasks.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use swarm_client::{SwarmClient, SwarmClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SwarmClient::new("http://swarm-manager:2375".to_string(), Duration::from_secs(30))?;
//!
//! client.ping().await?;
//! let services = client.list_services(&[("label", "deployer=LAIN")]).await?;
//! let tasks = client.list_tasks(&[("service", "hello-web"), ("desired-state", "running")]).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod swarm_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::SwarmClient;
pub use error::SwarmError;
pub use models::*;
pub use swarm_trait::SwarmClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockSwarmClient;
