//! Stateful workload: StatefulSet with stable per-instance names

use super::api::KubeApi;
use super::pod::Identity;
use super::render;
use super::workload::{KubeWorkloadController, WorkloadKind};
use crate::error::ClusterError;
use k8s_openapi::api::apps::v1::StatefulSet;
use model::{PodGroupSpec, ValidationError};

/// Controller for stateful pod groups
pub type StatefulSetController = KubeWorkloadController<StatefulSet>;

#[async_trait::async_trait]
impl WorkloadKind for StatefulSet {
    const KIND: &'static str = "StatefulSet";
    const IDENTITY: Identity = Identity::Ordinal;
    const HAS_SERVICE: bool = false;

    fn render(spec: &PodGroupSpec, namespace: &str) -> Result<Self, ValidationError> {
        render::stateful_set(spec, namespace)
    }

    fn adopt_spec(&mut self, rendered: &Self) {
        self.spec.clone_from(&rendered.spec);
    }

    fn set_replicas(&mut self, replicas: i32) {
        if let Some(spec) = self.spec.as_mut() {
            spec.replicas = Some(replicas);
        }
    }

    fn replicas(&self) -> u32 {
        self.spec
            .as_ref()
            .and_then(|s| s.replicas)
            .and_then(|r| u32::try_from(r).ok())
            .unwrap_or(0)
    }

    async fn get(api: &dyn KubeApi, namespace: &str, name: &str) -> Result<Self, ClusterError> {
        api.get_stateful_set(namespace, name).await
    }

    async fn create(api: &dyn KubeApi, namespace: &str, obj: &Self) -> Result<Self, ClusterError> {
        api.create_stateful_set(namespace, obj).await
    }

    async fn replace(api: &dyn KubeApi, namespace: &str, name: &str, obj: &Self) -> Result<Self, ClusterError> {
        api.replace_stateful_set(namespace, name, obj).await
    }

    async fn delete(api: &dyn KubeApi, namespace: &str, name: &str) -> Result<(), ClusterError> {
        api.delete_stateful_set(namespace, name).await
    }
}
