//! Stateless workload: Deployment + Service

use super::api::KubeApi;
use super::pod::Identity;
use super::render;
use super::workload::{KubeWorkloadController, WorkloadKind};
use crate::error::ClusterError;
use k8s_openapi::api::apps::v1::Deployment;
use model::{PodGroupSpec, ValidationError};

/// Controller for stateless pod groups
pub type DeploymentController = KubeWorkloadController<Deployment>;

#[async_trait::async_trait]
impl WorkloadKind for Deployment {
    const KIND: &'static str = "Deployment";
    const IDENTITY: Identity = Identity::CreationOrder;
    const HAS_SERVICE: bool = true;

    fn render(spec: &PodGroupSpec, namespace: &str) -> Result<Self, ValidationError> {
        render::deployment(spec, namespace)
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
        api.get_deployment(namespace, name).await
    }

    async fn create(api: &dyn KubeApi, namespace: &str, obj: &Self) -> Result<Self, ClusterError> {
        api.create_deployment(namespace, obj).await
    }

    async fn replace(api: &dyn KubeApi, namespace: &str, name: &str, obj: &Self) -> Result<Self, ClusterError> {
        api.replace_deployment(namespace, name, obj).await
    }

    async fn delete(api: &dyn KubeApi, namespace: &str, name: &str) -> Result<(), ClusterError> {
        api.delete_deployment(namespace, name).await
    }
}
