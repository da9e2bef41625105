//! Cluster facade
//!
//! One contract over every backend. Each call builds a fresh controller and
//! delegates to it; a facade holds configuration only.

use crate::error::ClusterError;
use crate::k8s::K8sCluster;
use crate::swarm::SwarmCluster;
use model::{DEPLOYER, LABEL_APP, LABEL_DEPLOYER, LABEL_PROC, Node, PodGroup, PodGroupSpec, sanitize};

/// Pod-group operations offered by a backend cluster
#[async_trait::async_trait]
pub trait Cluster: Send + Sync {
    /// Capacity and utilization of every node.
    async fn get_resources(&self) -> Result<Vec<Node>, ClusterError>;

    /// Pod groups owned by the daemon.
    ///
    /// Every filter is an extra `key=value` label selector term. Groups whose
    /// desired count is zero are omitted unless `show_all` is set.
    async fn list_pod_groups(&self, show_all: bool, filters: &[String]) -> Result<Vec<PodGroup>, ClusterError>;

    /// Create the backend objects and wait until every instance runs.
    async fn create_pod_group(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError>;

    /// Current observed state.
    async fn inspect_pod_group(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError>;

    /// Upgrade the backend objects to `spec` and wait until every instance runs.
    async fn patch_pod_group(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError>;

    /// Delete the backend objects; absence is success.
    async fn remove_pod_group(&self, spec: &PodGroupSpec) -> Result<(), ClusterError>;
}

/// Label selector for listing: the deployer label plus every filter term.
///
/// Values of `app` and `proc` terms are sanitized so a dotted pod-group name
/// matches the labels stamped on its objects.
#[must_use]
pub fn list_selector(filters: &[String]) -> String {
    std::iter::once(format!("{LABEL_DEPLOYER}={DEPLOYER}"))
        .chain(filters.iter().map(|f| f.trim()).filter(|f| !f.is_empty()).map(selector_term))
        .collect::<Vec<_>>()
        .join(",")
}

fn selector_term(term: &str) -> String {
    match term.split_once('=') {
        Some((key, value)) if [LABEL_APP, LABEL_PROC].contains(&key.trim()) => {
            format!("{}={}", key.trim(), sanitize(value.trim()))
        }
        _ => term.to_string(),
    }
}

/// The configured backend
#[derive(Debug)]
pub enum Backend {
    /// Deployments, StatefulSets and Services on a Kubernetes API server
    Kubernetes(K8sCluster),
    /// Replicated services on a Swarm manager
    Swarm(SwarmCluster),
}

impl Backend {
    fn cluster(&self) -> &dyn Cluster {
        match self {
            Self::Kubernetes(c) => c,
            Self::Swarm(c) => c,
        }
    }

    /// Backend name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Kubernetes(_) => "kubernetes",
            Self::Swarm(_) => "swarm",
        }
    }
}

#[async_trait::async_trait]
impl Cluster for Backend {
    async fn get_resources(&self) -> Result<Vec<Node>, ClusterError> {
        self.cluster().get_resources().await
    }

    async fn list_pod_groups(&self, show_all: bool, filters: &[String]) -> Result<Vec<PodGroup>, ClusterError> {
        self.cluster().list_pod_groups(show_all, filters).await
    }

    async fn create_pod_group(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        self.cluster().create_pod_group(spec).await
    }

    async fn inspect_pod_group(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        self.cluster().inspect_pod_group(spec).await
    }

    async fn patch_pod_group(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        self.cluster().patch_pod_group(spec).await
    }

    async fn remove_pod_group(&self, spec: &PodGroupSpec) -> Result<(), ClusterError> {
        self.cluster().remove_pod_group(spec).await
    }
}
