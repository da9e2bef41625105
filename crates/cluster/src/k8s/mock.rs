//! Mock KubeApi for unit testing
//!
//! Holds workloads and services in memory with a per-object resourceVersion,
//! so read-modify-write races can be exercised. Unless a test scripts pod
//! lists for a selector, `list_pods` synthesizes one running pod per desired
//! replica of every workload whose pod template matches the selector.

use super::api::KubeApi;
use crate::error::ClusterError;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus, StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateRunning, ContainerStatus, Node, Pod, PodSpec, PodStatus, PodTemplateSpec, Service,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

type Key = (String, String);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// RFC 3339 timestamp as a Kubernetes `Time`
#[must_use]
pub fn time(rfc3339: &str) -> Option<Time> {
    serde_json::from_value(serde_json::Value::String(rfc3339.to_string())).ok()
}

/// A mutation accepted by the mock, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    /// "create", "replace" or "delete"
    pub verb: &'static str,
    /// Object kind
    pub kind: &'static str,
    /// Object name
    pub name: String,
}

#[derive(Default)]
struct Objects {
    deployments: HashMap<Key, Deployment>,
    stateful_sets: HashMap<Key, StatefulSet>,
    services: HashMap<Key, Service>,
    nodes: Vec<Node>,
    pods: Vec<Pod>,
    next_version: u64,
}

impl Objects {
    fn stamp(&mut self, meta: &mut ObjectMeta, namespace: &str) {
        self.next_version += 1;
        meta.resource_version = Some(self.next_version.to_string());
        meta.namespace = Some(namespace.to_string());
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = time("2024-01-01T00:00:00Z");
        }
    }
}

/// Mock KubeApi for testing
#[derive(Clone, Default)]
pub struct MockKubeApi {
    objects: Arc<Mutex<Objects>>,
    scripted_pods: Arc<Mutex<HashMap<Key, VecDeque<Vec<Pod>>>>>,
    pending_conflicts: Arc<Mutex<u32>>,
    pending_service_conflicts: Arc<Mutex<u32>>,
    pending_rejection: Arc<Mutex<Option<(&'static str, u16, String)>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    replaced_deployments: Arc<Mutex<Vec<Deployment>>>,
}

impl std::fmt::Debug for MockKubeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockKubeApi").finish_non_exhaustive()
    }
}

impl MockKubeApi {
    /// Create an empty mock cluster
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node (for test setup)
    pub fn add_node(&self, node: Node) {
        lock(&self.objects).nodes.push(node);
    }

    /// Add a pod returned by `list_all_pods` (for test setup)
    pub fn add_pod(&self, pod: Pod) {
        lock(&self.objects).pods.push(pod);
    }

    /// Store a deployment directly, bypassing create
    pub fn insert_deployment(&self, namespace: &str, mut deployment: Deployment) {
        let mut objects = lock(&self.objects);
        objects.stamp(&mut deployment.metadata, namespace);
        let name = deployment.metadata.name.clone().unwrap_or_default();
        objects.deployments.insert(key(namespace, &name), deployment);
    }

    /// Store a service directly, bypassing create
    pub fn insert_service(&self, namespace: &str, mut service: Service) {
        let mut objects = lock(&self.objects);
        objects.stamp(&mut service.metadata, namespace);
        let name = service.metadata.name.clone().unwrap_or_default();
        objects.services.insert(key(namespace, &name), service);
    }

    /// Current stored deployment, if any
    #[must_use]
    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        lock(&self.objects).deployments.get(&key(namespace, name)).cloned()
    }

    /// Current stored stateful set, if any
    #[must_use]
    pub fn stateful_set(&self, namespace: &str, name: &str) -> Option<StatefulSet> {
        lock(&self.objects).stateful_sets.get(&key(namespace, name)).cloned()
    }

    /// Current stored service, if any
    #[must_use]
    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        lock(&self.objects).services.get(&key(namespace, name)).cloned()
    }

    /// Script successive `list_pods` answers for a selector; the last one repeats
    pub fn script_pods(&self, namespace: &str, selector: &str, polls: Vec<Vec<Pod>>) {
        lock(&self.scripted_pods).insert(key(namespace, selector), polls.into());
    }

    /// Make the next `n` replaces fail with a 409 conflict
    pub fn conflict_next_replaces(&self, n: u32) {
        *lock(&self.pending_conflicts) = n;
    }

    /// Make the next `n` Service replaces fail with a 409 conflict
    pub fn conflict_next_service_replaces(&self, n: u32) {
        *lock(&self.pending_service_conflicts) = n;
    }

    /// Make the next create of `kind` fail with the given status
    pub fn reject_next_create(&self, kind: &'static str, code: u16, message: impl Into<String>) {
        *lock(&self.pending_rejection) = Some((kind, code, message.into()));
    }

    /// Mutations accepted so far
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// Every deployment submitted through `replace_deployment`, in order
    #[must_use]
    pub fn replaced_deployments(&self) -> Vec<Deployment> {
        lock(&self.replaced_deployments).clone()
    }

    /// Bump a deployment's resourceVersion as if another writer updated it
    pub fn touch_deployment(&self, namespace: &str, name: &str) {
        let mut objects = lock(&self.objects);
        objects.next_version += 1;
        let version = objects.next_version.to_string();
        if let Some(d) = objects.deployments.get_mut(&key(namespace, name)) {
            d.metadata.resource_version = Some(version);
        }
    }

    fn record(&self, verb: &'static str, kind: &'static str, name: &str) {
        lock(&self.calls).push(MockCall {
            verb,
            kind,
            name: name.to_string(),
        });
    }

    fn take_rejection(&self, kind: &'static str, name: &str) -> Result<(), ClusterError> {
        let mut pending = lock(&self.pending_rejection);
        if pending.as_ref().is_some_and(|(k, _, _)| *k == kind) {
            if let Some((kind, code, message)) = pending.take() {
                return Err(ClusterError::Rejected {
                    kind,
                    name: name.to_string(),
                    code,
                    message,
                });
            }
        }
        Ok(())
    }

    fn take_conflict(kind: &'static str, name: &str, pending: &Mutex<u32>) -> Result<(), ClusterError> {
        let mut pending = lock(pending);
        if *pending > 0 {
            *pending -= 1;
            return Err(ClusterError::RaceLost {
                kind,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn check_version(kind: &'static str, name: &str, stored: &ObjectMeta, incoming: &ObjectMeta) -> Result<(), ClusterError> {
        if incoming.resource_version.is_some() && incoming.resource_version != stored.resource_version {
            return Err(ClusterError::RaceLost {
                kind,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn synthesize_pods(&self, namespace: &str, selector: &str) -> Vec<Pod> {
        let terms: Vec<(&str, &str)> = selector.split(',').filter_map(|t| t.split_once('=')).collect();
        let matches = |template: &PodTemplateSpec| {
            let labels = template.metadata.as_ref().and_then(|m| m.labels.as_ref());
            terms
                .iter()
                .all(|(k, v)| labels.and_then(|l| l.get(*k)).is_some_and(|actual| actual == v))
        };

        let objects = lock(&self.objects);
        let mut pods = Vec::new();
        for ((ns, name), d) in &objects.deployments {
            if ns != namespace {
                continue;
            }
            if let Some(spec) = d.spec.as_ref().filter(|s| matches(&s.template)) {
                let replicas = spec.replicas.unwrap_or(1);
                for i in 0..replicas {
                    pods.push(running_pod(&format!("{name}-5d8f7c-{i}"), namespace, &spec.template, i));
                }
            }
        }
        for ((ns, name), s) in &objects.stateful_sets {
            if ns != namespace {
                continue;
            }
            if let Some(spec) = s.spec.as_ref().filter(|s| matches(&s.template)) {
                let replicas = spec.replicas.unwrap_or(1);
                for i in 0..replicas {
                    pods.push(running_pod(&format!("{name}-{i}"), namespace, &spec.template, i));
                }
            }
        }
        pods
    }
}

/// A running pod stamped from `template`, started `index` minutes after midnight
#[must_use]
pub fn running_pod(name: &str, namespace: &str, template: &PodTemplateSpec, index: i32) -> Pod {
    let started = format!("2024-01-01T00:{:02}:00Z", index.clamp(0, 59));
    let containers = template
        .spec
        .as_ref()
        .map(|s| s.containers.clone())
        .unwrap_or_default();
    let statuses = containers
        .iter()
        .map(|c| ContainerStatus {
            name: c.name.clone(),
            image: c.image.clone().unwrap_or_default(),
            image_id: String::new(),
            container_id: Some(format!("containerd://{name}-{}", c.name)),
            ready: true,
            restart_count: 0,
            state: Some(ContainerState {
                running: Some(ContainerStateRunning {
                    started_at: time(&started),
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: template.metadata.as_ref().and_then(|m| m.labels.clone()),
            creation_timestamp: time(&started),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers,
            node_name: Some("node-1".to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            pod_ip: Some(format!("10.1.0.{}", index + 1)),
            host_ip: Some("192.168.0.1".to_string()),
            container_statuses: Some(statuses),
            ..Default::default()
        }),
    }
}

#[async_trait::async_trait]
impl KubeApi for MockKubeApi {
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, ClusterError> {
        let scripted = {
            let mut scripted = lock(&self.scripted_pods);
            scripted.get_mut(&key(namespace, selector)).and_then(|polls| {
                if polls.len() > 1 { polls.pop_front() } else { polls.front().cloned() }
            })
        };
        Ok(scripted.unwrap_or_else(|| self.synthesize_pods(namespace, selector)))
    }

    async fn list_all_pods(&self) -> Result<Vec<Pod>, ClusterError> {
        Ok(lock(&self.objects).pods.clone())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        Ok(lock(&self.objects).nodes.clone())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError> {
        self.deployment(namespace, name)
            .ok_or_else(|| ClusterError::NotFound(format!("Deployment {name}")))
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, ClusterError> {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        self.take_rejection("Deployment", &name)?;
        let mut objects = lock(&self.objects);
        if objects.deployments.contains_key(&key(namespace, &name)) {
            return Err(already_exists("Deployment", "deployments.apps", name));
        }
        let mut stored = deployment.clone();
        objects.stamp(&mut stored.metadata, namespace);
        let replicas = stored.spec.as_ref().and_then(|s| s.replicas);
        stored.status = Some(DeploymentStatus {
            replicas,
            ready_replicas: replicas,
            observed_generation: Some(1),
            ..Default::default()
        });
        objects.deployments.insert(key(namespace, &name), stored.clone());
        drop(objects);
        self.record("create", "Deployment", &name);
        Ok(stored)
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        name: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError> {
        lock(&self.replaced_deployments).push(deployment.clone());
        Self::take_conflict("Deployment", name, &self.pending_conflicts)?;
        let mut objects = lock(&self.objects);
        let current = objects
            .deployments
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("Deployment {name}")))?;
        Self::check_version("Deployment", name, &current.metadata, &deployment.metadata)?;
        let mut stored = deployment.clone();
        stored.status = current.status;
        objects.stamp(&mut stored.metadata, namespace);
        objects.deployments.insert(key(namespace, name), stored.clone());
        drop(objects);
        self.record("replace", "Deployment", name);
        Ok(stored)
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        lock(&self.objects)
            .deployments
            .remove(&key(namespace, name))
            .ok_or_else(|| ClusterError::NotFound(format!("Deployment {name}")))?;
        self.record("delete", "Deployment", name);
        Ok(())
    }

    async fn list_deployments(&self, selector: &str) -> Result<Vec<Deployment>, ClusterError> {
        let terms: Vec<(&str, &str)> = selector.split(',').filter_map(|t| t.split_once('=')).collect();
        let objects = lock(&self.objects);
        let mut found: Vec<Deployment> = objects
            .deployments
            .values()
            .filter(|d| labels_match(d.metadata.labels.as_ref(), &terms))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(found)
    }

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<StatefulSet, ClusterError> {
        self.stateful_set(namespace, name)
            .ok_or_else(|| ClusterError::NotFound(format!("StatefulSet {name}")))
    }

    async fn create_stateful_set(&self, namespace: &str, set: &StatefulSet) -> Result<StatefulSet, ClusterError> {
        let name = set.metadata.name.clone().unwrap_or_default();
        self.take_rejection("StatefulSet", &name)?;
        let mut objects = lock(&self.objects);
        if objects.stateful_sets.contains_key(&key(namespace, &name)) {
            return Err(already_exists("StatefulSet", "statefulsets.apps", name));
        }
        let mut stored = set.clone();
        objects.stamp(&mut stored.metadata, namespace);
        let replicas = stored.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        stored.status = Some(StatefulSetStatus {
            replicas,
            ready_replicas: Some(replicas),
            ..Default::default()
        });
        objects.stateful_sets.insert(key(namespace, &name), stored.clone());
        drop(objects);
        self.record("create", "StatefulSet", &name);
        Ok(stored)
    }

    async fn replace_stateful_set(
        &self,
        namespace: &str,
        name: &str,
        set: &StatefulSet,
    ) -> Result<StatefulSet, ClusterError> {
        Self::take_conflict("StatefulSet", name, &self.pending_conflicts)?;
        let mut objects = lock(&self.objects);
        let current = objects
            .stateful_sets
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("StatefulSet {name}")))?;
        Self::check_version("StatefulSet", name, &current.metadata, &set.metadata)?;
        let mut stored = set.clone();
        stored.status = current.status;
        objects.stamp(&mut stored.metadata, namespace);
        objects.stateful_sets.insert(key(namespace, name), stored.clone());
        drop(objects);
        self.record("replace", "StatefulSet", name);
        Ok(stored)
    }

    async fn delete_stateful_set(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        lock(&self.objects)
            .stateful_sets
            .remove(&key(namespace, name))
            .ok_or_else(|| ClusterError::NotFound(format!("StatefulSet {name}")))?;
        self.record("delete", "StatefulSet", name);
        Ok(())
    }

    async fn list_stateful_sets(&self, selector: &str) -> Result<Vec<StatefulSet>, ClusterError> {
        let terms: Vec<(&str, &str)> = selector.split(',').filter_map(|t| t.split_once('=')).collect();
        let objects = lock(&self.objects);
        let mut found: Vec<StatefulSet> = objects
            .stateful_sets
            .values()
            .filter(|s| labels_match(s.metadata.labels.as_ref(), &terms))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(found)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        self.service(namespace, name)
            .ok_or_else(|| ClusterError::NotFound(format!("Service {name}")))
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ClusterError> {
        let name = service.metadata.name.clone().unwrap_or_default();
        self.take_rejection("Service", &name)?;
        let mut objects = lock(&self.objects);
        if objects.services.contains_key(&key(namespace, &name)) {
            return Err(already_exists("Service", "services", name));
        }
        let mut stored = service.clone();
        objects.stamp(&mut stored.metadata, namespace);
        objects.services.insert(key(namespace, &name), stored.clone());
        drop(objects);
        self.record("create", "Service", &name);
        Ok(stored)
    }

    async fn replace_service(&self, namespace: &str, name: &str, service: &Service) -> Result<Service, ClusterError> {
        let mut objects = lock(&self.objects);
        let current = objects
            .services
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("Service {name}")))?;
        Self::take_conflict("Service", name, &self.pending_service_conflicts)?;
        Self::check_version("Service", name, &current.metadata, &service.metadata)?;
        let mut stored = service.clone();
        objects.stamp(&mut stored.metadata, namespace);
        objects.services.insert(key(namespace, name), stored.clone());
        drop(objects);
        self.record("replace", "Service", name);
        Ok(stored)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        lock(&self.objects)
            .services
            .remove(&key(namespace, name))
            .ok_or_else(|| ClusterError::NotFound(format!("Service {name}")))?;
        self.record("delete", "Service", name);
        Ok(())
    }
}

/// The API server's answer to a create on an existing name
fn already_exists(kind: &'static str, resource: &str, name: String) -> ClusterError {
    ClusterError::Rejected {
        kind,
        message: format!("{resource} \"{name}\" already exists"),
        name,
        code: 409,
    }
}

fn labels_match(labels: Option<&BTreeMap<String, String>>, terms: &[(&str, &str)]) -> bool {
    terms
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(*k)).is_some_and(|actual| actual == v))
}
