//! Swarm backend
//!
//! Each pod group is one replicated Swarm service named after the sanitized
//! pod-group name. Tasks stand in for pods and their slots for instance
//! numbers.

pub mod render;
pub mod tasks;

use crate::config::ClusterConfig;
use crate::convergence;
use crate::error::ClusterError;
use crate::facade::{Cluster, list_selector};
use model::{ANNOTATION_NAMESPACE, ANNOTATION_POD_GROUP, LABEL_APP, LABEL_PROC, Node, PodGroup, PodGroupSpec};
use std::collections::HashMap;
use std::sync::Arc;
use swarm_client::{Service, ServiceSpec, SwarmClientTrait, SwarmError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Kind name used in errors
const KIND: &str = "Service";

/// [`Cluster`] on a Swarm manager
#[derive(Clone)]
pub struct SwarmCluster {
    client: Arc<dyn SwarmClientTrait>,
    config: ClusterConfig,
    shutdown: watch::Receiver<bool>,
}

impl std::fmt::Debug for SwarmCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwarmCluster")
            .field("base_url", &self.client.base_url())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Rebuild the identity of a listed service from its labels
fn listed_spec(service: &Service) -> PodGroupSpec {
    let labels = &service.spec.labels;
    let name = labels
        .get(ANNOTATION_POD_GROUP)
        .or_else(|| labels.get(LABEL_PROC))
        .cloned()
        .unwrap_or_else(|| service.spec.name.clone());
    let namespace = labels
        .get(ANNOTATION_NAMESPACE)
        .or_else(|| labels.get(LABEL_APP))
        .cloned()
        .unwrap_or_default();

    PodGroupSpec {
        name,
        namespace,
        num_instances: u32::try_from(service.spec.replicas()).unwrap_or(u32::MAX),
        ..Default::default()
    }
}

impl SwarmCluster {
    /// Facade over `client`; `shutdown` cancels convergence waits
    pub fn new(client: Arc<dyn SwarmClientTrait>, config: ClusterConfig, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            client,
            config,
            shutdown,
        }
    }

    async fn observe(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        let name = spec.object_name();
        let tasks = self
            .client
            .list_tasks(&[
                ("service", name.as_str()),
                ("desired-state", "running"),
                ("desired-state", "shutdown"),
            ])
            .await?;
        let nodes = self.client.list_nodes().await?;
        debug!("{} tasks for service {}", tasks.len(), name);
        Ok(tasks::to_pod_group(spec, &tasks, &nodes))
    }

    async fn watch(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        let mut shutdown = self.shutdown.clone();
        convergence::wait_for_convergence(
            &spec.name,
            spec.num_instances,
            self.config.watch,
            &mut shutdown,
            || self.observe(spec),
        )
        .await
    }

    /// Submit `rendered` against the current version; on a version conflict
    /// re-read once and resubmit.
    async fn update_with_retry(&self, name: &str, rendered: &ServiceSpec) -> Result<(), ClusterError> {
        let current = self.client.inspect_service(name).await?;
        match self
            .client
            .update_service(&current.id, current.version.index, rendered)
            .await
        {
            Err(SwarmError::Conflict(message)) => {
                warn!("Service {} changed since it was read ({}), retrying", name, message);
            }
            other => return other.map_err(ClusterError::from),
        }

        let fresh = self.client.inspect_service(name).await?;
        match self.client.update_service(&fresh.id, fresh.version.index, rendered).await {
            Err(SwarmError::Conflict(_)) => Err(ClusterError::RaceLost {
                kind: KIND,
                name: name.to_string(),
            }),
            other => other.map_err(ClusterError::from),
        }
    }
}

#[async_trait::async_trait]
impl Cluster for SwarmCluster {
    async fn get_resources(&self) -> Result<Vec<Node>, ClusterError> {
        let nodes = self.client.list_nodes().await?;
        let tasks = self.client.list_tasks(&[("desired-state", "running")]).await?;

        let mut used: HashMap<&str, (u32, i64, i64)> = HashMap::new();
        for task in tasks.iter().filter(|t| t.is_running()) {
            let entry = used.entry(task.node_id.as_str()).or_default();
            entry.0 += 1;
            if let Some(r) = task.spec.resources.as_ref().and_then(|r| r.reservations.as_ref()) {
                entry.1 += r.nano_cpus.unwrap_or_default();
                entry.2 += r.memory_bytes.unwrap_or_default();
            }
        }

        #[allow(clippy::cast_precision_loss, reason = "cpu counts are far below 2^52 nanocpus")]
        let cpus = |nano: i64| nano as f64 / 1e9;

        Ok(nodes
            .iter()
            .map(|n| {
                let (containers, nano_cpus, memory) = used.get(n.id.as_str()).copied().unwrap_or_default();
                let resources = &n.description.resources;
                Node {
                    name: if n.description.hostname.is_empty() {
                        n.id.clone()
                    } else {
                        n.description.hostname.clone()
                    },
                    address: n.status.addr.clone(),
                    containers,
                    cpus: cpus(resources.nano_cpus.unwrap_or_default()),
                    used_cpus: cpus(nano_cpus),
                    memory: resources.memory_bytes.unwrap_or_default(),
                    used_memory: memory,
                }
            })
            .collect())
    }

    async fn list_pod_groups(&self, show_all: bool, filters: &[String]) -> Result<Vec<PodGroup>, ClusterError> {
        let selector = list_selector(filters);
        info!("Listing services matching {}", selector);
        let terms: Vec<(&str, &str)> = selector.split(',').map(|term| ("label", term)).collect();

        let services = self.client.list_services(&terms).await?;
        let mut groups = Vec::new();
        for spec in services.iter().map(listed_spec) {
            if show_all || spec.num_instances > 0 {
                groups.push(self.observe(&spec).await?);
            }
        }
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }

    async fn create_pod_group(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        spec.validate()?;
        let rendered = render::service_spec(spec)?;

        info!("Creating Service {} with {} replicas", rendered.name, spec.num_instances);
        let created = self.client.create_service(&rendered).await?;
        if let Some(warning) = created.warning.as_deref() {
            warn!("Swarm manager warned on {}: {}", rendered.name, warning);
        }
        info!("Created Service {} ({})", rendered.name, created.id);

        self.watch(spec).await
    }

    async fn inspect_pod_group(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        self.client.inspect_service(&spec.object_name()).await?;
        self.observe(spec).await
    }

    async fn patch_pod_group(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        spec.validate()?;
        let rendered = render::service_spec(spec)?;

        info!("Updating Service {} to {} replicas", rendered.name, spec.num_instances);
        self.update_with_retry(&rendered.name, &rendered).await?;
        info!("Updated Service {}", rendered.name);

        self.watch(spec).await
    }

    async fn remove_pod_group(&self, spec: &PodGroupSpec) -> Result<(), ClusterError> {
        let name = spec.object_name();
        match self.client.remove_service(&name).await {
            Ok(()) => {
                info!("Deleted Service {}", name);
                Ok(())
            }
            Err(SwarmError::NotFound(_)) => {
                info!("Service {} already absent", name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
