//! deployd cluster core
//!
//! Reconciles declarative pod-group specs against a container cluster.
//!
//! - `facade`: the [`Cluster`] contract and the [`Backend`] selector
//! - `k8s`: Deployments, StatefulSets and Services on Kubernetes
//! - `swarm`: replicated services on a Swarm manager
//! - `convergence`: the poll-until-running wait shared by both backends
//!
//! Every mutating call returns only after the observed state matches the
//! request, the deadline passes, or shutdown is signalled.

pub mod config;
pub mod convergence;
pub mod error;
pub mod facade;
pub mod k8s;
pub mod swarm;

pub use config::{ClusterConfig, WatchConfig};
pub use error::ClusterError;
pub use facade::{Backend, Cluster};
pub use k8s::{K8sCluster, KubeApi, KubeClientApi};
#[cfg(any(test, feature = "test-util"))]
pub use k8s::MockKubeApi;
pub use swarm::SwarmCluster;
