//! Kubernetes API seam
//!
//! Controllers never hold a raw `kube::Client`; they go through [`KubeApi`] so
//! tests can substitute [`super::mock::MockKubeApi`]. Every method classifies
//! kube errors with [`ClusterError::from_kube`].

use crate::error::ClusterError;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// Kubernetes operations used by the workload controllers
#[async_trait::async_trait]
pub trait KubeApi: Send + Sync {
    // Pods
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, ClusterError>;
    async fn list_all_pods(&self) -> Result<Vec<Pod>, ClusterError>;

    // Nodes
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError>;

    // Deployments
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError>;
    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, ClusterError>;
    async fn replace_deployment(
        &self,
        namespace: &str,
        name: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError>;
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
    /// Deployments in every namespace matching `selector`
    async fn list_deployments(&self, selector: &str) -> Result<Vec<Deployment>, ClusterError>;

    // StatefulSets
    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<StatefulSet, ClusterError>;
    async fn create_stateful_set(&self, namespace: &str, set: &StatefulSet) -> Result<StatefulSet, ClusterError>;
    async fn replace_stateful_set(
        &self,
        namespace: &str,
        name: &str,
        set: &StatefulSet,
    ) -> Result<StatefulSet, ClusterError>;
    async fn delete_stateful_set(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
    /// StatefulSets in every namespace matching `selector`
    async fn list_stateful_sets(&self, selector: &str) -> Result<Vec<StatefulSet>, ClusterError>;

    // Services
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError>;
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ClusterError>;
    async fn replace_service(&self, namespace: &str, name: &str, service: &Service) -> Result<Service, ClusterError>;
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
}

/// [`KubeApi`] backed by a live API server
#[derive(Clone)]
pub struct KubeClientApi {
    client: Client,
}

impl std::fmt::Debug for KubeClientApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClientApi").finish_non_exhaustive()
    }
}

impl KubeClientApi {
    /// Wrap an existing client
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient kube-config or in-cluster environment.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Kube`] when no configuration can be inferred.
    pub async fn try_default() -> Result<Self, ClusterError> {
        let client = Client::try_default().await.map_err(ClusterError::Kube)?;
        Ok(Self::new(client))
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn all<K>(&self) -> Api<K>
    where
        K: Resource,
        <K as Resource>::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }
}

async fn get<K>(api: Api<K>, kind: &'static str, name: &str) -> Result<K, ClusterError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.get(name).await.map_err(|e| ClusterError::from_kube(kind, name, e))
}

async fn create<K>(api: Api<K>, kind: &'static str, obj: &K) -> Result<K, ClusterError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = obj.meta().name.clone().unwrap_or_default();
    debug!("POST {} {}", kind, name);
    api.create(&PostParams::default(), obj)
        .await
        .map_err(|e| ClusterError::from_kube(kind, &name, e))
}

async fn replace<K>(api: Api<K>, kind: &'static str, name: &str, obj: &K) -> Result<K, ClusterError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    debug!("PUT {} {}", kind, name);
    api.replace(name, &PostParams::default(), obj)
        .await
        .map_err(|e| ClusterError::from_kube(kind, name, e))
}

async fn delete<K>(api: Api<K>, kind: &'static str, name: &str) -> Result<(), ClusterError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    debug!("DELETE {} {} (foreground)", kind, name);
    api.delete(name, &DeleteParams::foreground())
        .await
        .map(|_| ())
        .map_err(|e| ClusterError::from_kube(kind, name, e))
}

async fn list<K>(api: Api<K>, kind: &'static str, selector: &str) -> Result<Vec<K>, ClusterError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let params = if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(selector)
    };
    api.list(&params)
        .await
        .map(|list| list.items)
        .map_err(|e| ClusterError::from_kube(kind, selector, e))
}

#[async_trait::async_trait]
impl KubeApi for KubeClientApi {
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, ClusterError> {
        list(self.namespaced(namespace), "Pod", selector).await
    }

    async fn list_all_pods(&self) -> Result<Vec<Pod>, ClusterError> {
        list(self.all(), "Pod", "").await
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        list(self.all(), "Node", "").await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError> {
        get(self.namespaced(namespace), "Deployment", name).await
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, ClusterError> {
        create(self.namespaced(namespace), "Deployment", deployment).await
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        name: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError> {
        replace(self.namespaced(namespace), "Deployment", name, deployment).await
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        delete::<Deployment>(self.namespaced(namespace), "Deployment", name).await
    }

    async fn list_deployments(&self, selector: &str) -> Result<Vec<Deployment>, ClusterError> {
        list(self.all(), "Deployment", selector).await
    }

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<StatefulSet, ClusterError> {
        get(self.namespaced(namespace), "StatefulSet", name).await
    }

    async fn create_stateful_set(&self, namespace: &str, set: &StatefulSet) -> Result<StatefulSet, ClusterError> {
        create(self.namespaced(namespace), "StatefulSet", set).await
    }

    async fn replace_stateful_set(
        &self,
        namespace: &str,
        name: &str,
        set: &StatefulSet,
    ) -> Result<StatefulSet, ClusterError> {
        replace(self.namespaced(namespace), "StatefulSet", name, set).await
    }

    async fn delete_stateful_set(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        delete::<StatefulSet>(self.namespaced(namespace), "StatefulSet", name).await
    }

    async fn list_stateful_sets(&self, selector: &str) -> Result<Vec<StatefulSet>, ClusterError> {
        list(self.all(), "StatefulSet", selector).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        get(self.namespaced(namespace), "Service", name).await
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ClusterError> {
        create(self.namespaced(namespace), "Service", service).await
    }

    async fn replace_service(&self, namespace: &str, name: &str, service: &Service) -> Result<Service, ClusterError> {
        replace(self.namespaced(namespace), "Service", name, service).await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        delete::<Service>(self.namespaced(namespace), "Service", name).await
    }
}
