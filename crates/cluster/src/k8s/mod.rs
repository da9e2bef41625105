//! Kubernetes backend
//!
//! Stateless pod groups become a Deployment plus a Service, stateful ones a
//! StatefulSet. All API access goes through [`KubeApi`].

pub mod api;
pub mod deployment;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod pod;
pub mod render;
pub mod resources;
pub mod service;
pub mod statefulset;
pub mod workload;
#[cfg(test)]
mod workload_test;

pub use api::{KubeApi, KubeClientApi};
pub use deployment::DeploymentController;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockKubeApi;
pub use statefulset::StatefulSetController;
pub use workload::{ControllerContext, Workload, WorkloadController, WorkloadKind, select};

use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::facade::{Cluster, list_selector};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use model::{
    ANNOTATION_NAMESPACE, ANNOTATION_POD_GROUP, LABEL_APP, LABEL_PROC, Node, PodGroup, PodGroupSpec,
};
use pod::{Identity, PodObserver};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// [`Cluster`] on a Kubernetes API server
#[derive(Clone)]
pub struct K8sCluster {
    api: Arc<dyn KubeApi>,
    config: ClusterConfig,
    shutdown: watch::Receiver<bool>,
}

impl std::fmt::Debug for K8sCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("K8sCluster")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A listed workload, reduced to what the observer needs
struct Listed {
    spec: PodGroupSpec,
    namespace: String,
    identity: Identity,
}

fn listed(meta: &ObjectMeta, replicas: u32, identity: Identity) -> Listed {
    let annotation = |key: &str| meta.annotations.as_ref().and_then(|a| a.get(key)).cloned();
    let label = |key: &str| meta.labels.as_ref().and_then(|l| l.get(key)).cloned();

    let name = annotation(ANNOTATION_POD_GROUP)
        .or_else(|| label(LABEL_PROC))
        .or_else(|| meta.name.clone())
        .unwrap_or_default();
    let namespace = annotation(ANNOTATION_NAMESPACE)
        .or_else(|| label(LABEL_APP))
        .unwrap_or_default();

    Listed {
        spec: PodGroupSpec {
            name,
            namespace,
            num_instances: replicas,
            stateful: identity == Identity::Ordinal,
            ..Default::default()
        },
        namespace: meta.namespace.clone().unwrap_or_default(),
        identity,
    }
}

impl K8sCluster {
    /// Facade over `api`; `shutdown` cancels convergence waits
    pub fn new(api: Arc<dyn KubeApi>, config: ClusterConfig, shutdown: watch::Receiver<bool>) -> Self {
        Self { api, config, shutdown }
    }

    fn context(&self, spec: &PodGroupSpec) -> ControllerContext {
        ControllerContext {
            api: Arc::clone(&self.api),
            namespace: self.config.namespace_for(&spec.namespace),
            watch_config: self.config.watch,
            shutdown: self.shutdown.clone(),
        }
    }

    fn workload(&self, spec: &PodGroupSpec) -> Workload {
        select(spec, self.context(spec))
    }

    async fn observe(&self, listed: &Listed) -> Result<PodGroup, ClusterError> {
        let observer = PodObserver::new(Arc::clone(&self.api), listed.namespace.clone());
        let pods = observer.inspect(&listed.spec).await?;
        Ok(pod::to_pod_group(&listed.spec, &pods, listed.identity))
    }
}

#[async_trait::async_trait]
impl Cluster for K8sCluster {
    async fn get_resources(&self) -> Result<Vec<Node>, ClusterError> {
        let nodes = self.api.list_nodes().await?;
        let pods = self.api.list_all_pods().await?;
        debug!("Summing requests of {} pods over {} nodes", pods.len(), nodes.len());
        Ok(resources::node_resources(&nodes, &pods))
    }

    async fn list_pod_groups(&self, show_all: bool, filters: &[String]) -> Result<Vec<PodGroup>, ClusterError> {
        let selector = list_selector(filters);
        info!("Listing pod groups matching {}", selector);

        let mut found: Vec<Listed> = self
            .api
            .list_deployments(&selector)
            .await?
            .iter()
            .map(|d| listed(&d.metadata, WorkloadKind::replicas(d), <Deployment as WorkloadKind>::IDENTITY))
            .collect();
        found.extend(
            self.api
                .list_stateful_sets(&selector)
                .await?
                .iter()
                .map(|s| listed(&s.metadata, WorkloadKind::replicas(s), <StatefulSet as WorkloadKind>::IDENTITY)),
        );

        let mut groups = Vec::new();
        for item in found.iter().filter(|l| show_all || l.spec.num_instances > 0) {
            groups.push(self.observe(item).await?);
        }
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }

    async fn create_pod_group(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        spec.validate()?;
        self.workload(spec).create(spec).await
    }

    async fn inspect_pod_group(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        self.workload(spec).inspect(spec).await
    }

    async fn patch_pod_group(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        spec.validate()?;
        self.workload(spec).upgrade(spec).await
    }

    async fn remove_pod_group(&self, spec: &PodGroupSpec) -> Result<(), ClusterError> {
        self.workload(spec).remove(spec).await
    }
}
