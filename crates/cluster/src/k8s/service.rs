//! Service controller
//!
//! Manages the Service exposing a stateless pod group's ports. Every
//! operation is keyed by the sanitized object name.

use super::api::KubeApi;
use super::render;
use crate::error::ClusterError;
use k8s_openapi::api::core::v1::Service;
use model::PodGroupSpec;
use std::sync::Arc;
use tracing::{info, warn};

/// Create, upgrade and remove the Service of a pod group
#[derive(Clone)]
pub struct ServiceController {
    api: Arc<dyn KubeApi>,
    namespace: String,
}

impl std::fmt::Debug for ServiceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceController")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl ServiceController {
    /// Controller for services in `namespace`
    pub fn new(api: Arc<dyn KubeApi>, namespace: impl Into<String>) -> Self {
        Self {
            api,
            namespace: namespace.into(),
        }
    }

    /// Desired Service for `spec`
    #[must_use]
    pub fn render(&self, spec: &PodGroupSpec) -> Service {
        render::service(spec, &self.namespace)
    }

    /// Submit a new Service.
    ///
    /// # Errors
    ///
    /// Backend rejections are returned unmodified.
    pub async fn create(&self, spec: &PodGroupSpec) -> Result<Service, ClusterError> {
        let name = spec.object_name();
        info!("Creating Service {}/{}", self.namespace, name);
        let created = self.api.create_service(&self.namespace, &self.render(spec)).await?;
        info!("Created Service {}/{}", self.namespace, name);
        Ok(created)
    }

    /// Replace the ports and selector of the remote Service.
    ///
    /// A missing Service is created. A write that loses to a concurrent
    /// update is retried once against a fresh read.
    ///
    /// # Errors
    ///
    /// Backend errors, including [`ClusterError::RaceLost`] when the retry
    /// also loses.
    pub async fn upgrade(&self, spec: &PodGroupSpec) -> Result<Service, ClusterError> {
        let name = spec.object_name();
        let remote = match self.api.get_service(&self.namespace, &name).await {
            Ok(svc) => svc,
            Err(e) if e.is_not_found() => {
                warn!("Service {}/{} missing during upgrade, creating it", self.namespace, name);
                return self.create(spec).await;
            }
            Err(e) => return Err(e),
        };

        info!("Updating Service {}/{}", self.namespace, name);
        match self.replace_desired(spec, &name, remote).await {
            Err(e) if e.is_race_lost() => {
                warn!("Service {}/{} changed since it was read, retrying", self.namespace, name);
            }
            other => return other,
        }

        let fresh = self.api.get_service(&self.namespace, &name).await?;
        self.replace_desired(spec, &name, fresh).await.map_err(|e| {
            if e.is_race_lost() {
                ClusterError::RaceLost {
                    kind: "Service",
                    name: name.clone(),
                }
            } else {
                e
            }
        })
    }

    async fn replace_desired(&self, spec: &PodGroupSpec, name: &str, mut remote: Service) -> Result<Service, ClusterError> {
        let desired = self.render(spec).spec.unwrap_or_default();
        let remote_spec = remote.spec.get_or_insert_with(Default::default);
        remote_spec.ports = desired.ports;
        remote_spec.selector = desired.selector;
        self.api.replace_service(&self.namespace, name, &remote).await
    }

    /// Delete the Service; absence is success.
    ///
    /// # Errors
    ///
    /// Backend errors other than not-found.
    pub async fn remove(&self, spec: &PodGroupSpec) -> Result<(), ClusterError> {
        let name = spec.object_name();
        match self.api.delete_service(&self.namespace, &name).await {
            Ok(()) => {
                info!("Deleted Service {}/{}", self.namespace, name);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                info!("Service {}/{} already absent", self.namespace, name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
