//! Mock SwarmClient for unit testing
//!
//! This module provides a mock implementation of SwarmClientTrait that can be used
//! in unit tests without requiring a running Swarm manager.
//!
//! Services live in memory. Unless a test scripts task lists for a service,
//! `list_tasks` reports one running task per desired replica.

use crate::error::SwarmError;
use crate::models::*;
use crate::swarm_trait::SwarmClientTrait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Mock SwarmClient for testing
#[derive(Clone, Default)]
pub struct MockSwarmClient {
    base_url: String,
    services: Arc<Mutex<HashMap<String, Service>>>,
    nodes: Arc<Mutex<Vec<Node>>>,
    // Scripted task lists per service name; the last entry repeats
    scripted_tasks: Arc<Mutex<HashMap<String, VecDeque<Vec<Task>>>>>,
    // Extra tasks (e.g. failed ones) appended to every listing for a service
    extra_tasks: Arc<Mutex<HashMap<String, Vec<Task>>>>,
    pending_conflicts: Arc<Mutex<u32>>,
    pending_create_rejection: Arc<Mutex<Option<String>>>,
    update_calls: Arc<Mutex<Vec<ServiceSpec>>>,
    next_id: Arc<Mutex<u64>>,
}

impl std::fmt::Debug for MockSwarmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSwarmClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl MockSwarmClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            next_id: Arc::new(Mutex::new(1)),
            ..Default::default()
        }
    }

    /// Add a node (for test setup)
    pub fn add_node(&self, node: Node) {
        lock(&self.nodes).push(node);
    }

    /// Add a service directly (for test setup)
    pub fn add_service(&self, service: Service) {
        lock(&self.services).insert(service.spec.name.clone(), service);
    }

    /// Current stored service, if any
    pub fn service(&self, name: &str) -> Option<Service> {
        lock(&self.services).get(name).cloned()
    }

    /// Script successive `list_tasks` answers for a service
    pub fn script_tasks(&self, service: &str, polls: Vec<Vec<Task>>) {
        lock(&self.scripted_tasks).insert(service.to_string(), polls.into());
    }

    /// Append tasks to every listing of a service
    pub fn add_extra_tasks(&self, service: &str, tasks: Vec<Task>) {
        lock(&self.extra_tasks).entry(service.to_string()).or_default().extend(tasks);
    }

    /// Make the next `n` updates fail with a version conflict
    pub fn conflict_next_updates(&self, n: u32) {
        *lock(&self.pending_conflicts) = n;
    }

    /// Make the next create fail with the given manager message
    pub fn reject_next_create(&self, message: impl Into<String>) {
        *lock(&self.pending_create_rejection) = Some(message.into());
    }

    /// Specs submitted through `update_service`, in order
    pub fn update_calls(&self) -> Vec<ServiceSpec> {
        lock(&self.update_calls).clone()
    }

    /// Bump a service's version as if another writer updated it
    pub fn touch_service(&self, name: &str) {
        if let Some(svc) = lock(&self.services).get_mut(name) {
            svc.version.index += 1;
        }
    }

    fn next_id(&self) -> u64 {
        let mut id = lock(&self.next_id);
        let current = *id;
        *id += 1;
        current
    }

    /// A running task for `service` in `slot`
    pub fn running_task(service: &Service, slot: u64) -> Task {
        Task {
            id: format!("task-{}-{}", service.spec.name, slot),
            service_id: service.id.clone(),
            node_id: "node-1".to_string(),
            slot: Some(slot),
            spec: service.spec.task_template.clone(),
            status: TaskStatus {
                timestamp: Some("2024-01-01T00:00:00Z".to_string()),
                state: "running".to_string(),
                message: "started".to_string(),
                err: None,
                container_status: Some(ContainerStatus {
                    container_id: format!("ctr-{}-{}", service.spec.name, slot),
                    pid: 100,
                }),
            },
            desired_state: "running".to_string(),
            networks_attachments: vec![NetworkAttachment {
                network: AttachedNetwork {
                    id: "net-lain".to_string(),
                    spec: NetworkSpec {
                        name: "lain".to_string(),
                    },
                },
                addresses: vec![format!("10.0.0.{slot}/24")],
            }],
        }
    }

    fn find_service(&self, key: &str) -> Option<Service> {
        let services = lock(&self.services);
        services
            .get(key)
            .or_else(|| services.values().find(|s| s.id == key))
            .cloned()
    }
}

fn filter_values<'a>(filters: &[(&'a str, &'a str)], key: &str) -> Vec<&'a str> {
    filters.iter().filter(|(k, _)| *k == key).map(|(_, v)| *v).collect()
}

#[async_trait::async_trait]
impl SwarmClientTrait for MockSwarmClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn ping(&self) -> Result<(), SwarmError> {
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, SwarmError> {
        Ok(lock(&self.nodes).clone())
    }

    async fn list_services(&self, filters: &[(&str, &str)]) -> Result<Vec<Service>, SwarmError> {
        let labels = filter_values(filters, "label");
        let mut services: Vec<Service> = lock(&self.services)
            .values()
            .filter(|svc| {
                labels.iter().all(|term| match term.split_once('=') {
                    Some((k, v)) => svc.spec.labels.get(k).is_some_and(|actual| actual == v),
                    None => svc.spec.labels.contains_key(*term),
                })
            })
            .cloned()
            .collect();
        services.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
        Ok(services)
    }

    async fn inspect_service(&self, name: &str) -> Result<Service, SwarmError> {
        self.find_service(name)
            .ok_or_else(|| SwarmError::NotFound(format!("service {name}")))
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<ServiceCreateResponse, SwarmError> {
        if let Some(message) = lock(&self.pending_create_rejection).take() {
            return Err(SwarmError::Api { status: 400, message });
        }
        let mut services = lock(&self.services);
        if services.contains_key(&spec.name) {
            return Err(SwarmError::Conflict(format!("service {} already exists", spec.name)));
        }
        let id = format!("svc{}", self.next_id());
        services.insert(
            spec.name.clone(),
            Service {
                id: id.clone(),
                version: ObjectVersion { index: 1 },
                spec: spec.clone(),
                created_at: None,
                updated_at: None,
            },
        );
        Ok(ServiceCreateResponse { id, warning: None })
    }

    async fn update_service(&self, id: &str, version: u64, spec: &ServiceSpec) -> Result<(), SwarmError> {
        lock(&self.update_calls).push(spec.clone());
        {
            let mut pending = lock(&self.pending_conflicts);
            if *pending > 0 {
                *pending -= 1;
                return Err(SwarmError::Conflict("update out of sequence".to_string()));
            }
        }
        let mut services = lock(&self.services);
        let svc = services
            .values_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| SwarmError::NotFound(format!("service {id}")))?;
        if svc.version.index != version {
            return Err(SwarmError::Conflict("update out of sequence".to_string()));
        }
        svc.spec = spec.clone();
        svc.version.index += 1;
        Ok(())
    }

    async fn remove_service(&self, name: &str) -> Result<(), SwarmError> {
        let key = self
            .find_service(name)
            .map(|s| s.spec.name)
            .ok_or_else(|| SwarmError::NotFound(format!("service {name}")))?;
        lock(&self.services).remove(&key);
        Ok(())
    }

    async fn list_tasks(&self, filters: &[(&str, &str)]) -> Result<Vec<Task>, SwarmError> {
        let wanted = filter_values(filters, "service");
        let services: Vec<Service> = lock(&self.services)
            .values()
            .filter(|s| wanted.is_empty() || wanted.contains(&s.spec.name.as_str()))
            .cloned()
            .collect();

        let mut tasks = Vec::new();
        for svc in &services {
            let scripted = {
                let mut scripted = lock(&self.scripted_tasks);
                scripted.get_mut(&svc.spec.name).and_then(|polls| {
                    if polls.len() > 1 { polls.pop_front() } else { polls.front().cloned() }
                })
            };
            match scripted {
                Some(list) => tasks.extend(list),
                None => tasks.extend((1..=svc.spec.replicas()).map(|slot| Self::running_task(svc, slot))),
            }
            if let Some(extra) = lock(&self.extra_tasks).get(&svc.spec.name) {
                tasks.extend(extra.iter().cloned());
            }
        }

        let states = filter_values(filters, "desired-state");
        tasks.retain(|t| states.is_empty() || states.contains(&t.desired_state.as_str()));
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, replicas: u64) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            labels: [("deployer".to_string(), "LAIN".to_string())].into(),
            mode: ServiceMode {
                replicated: Some(ReplicatedService { replicas }),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_then_tasks_follow_replicas() {
        let mock = MockSwarmClient::new("http://mock-swarm");
        mock.create_service(&spec("hello-web", 2)).await.unwrap();

        let tasks = mock.list_tasks(&[("service", "hello-web")]).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(Task::is_running));
    }

    #[tokio::test]
    async fn test_list_tasks_filters_desired_state() {
        // Setup: one running task and one the manager has shut down
        let mock = MockSwarmClient::new("http://mock-swarm");
        mock.create_service(&spec("hello-web", 1)).await.unwrap();
        let service = mock.service("hello-web").unwrap();
        let mut failed = MockSwarmClient::running_task(&service, 1);
        failed.id = "task-failed".to_string();
        failed.status.state = "failed".to_string();
        failed.desired_state = "shutdown".to_string();
        mock.add_extra_tasks("hello-web", vec![failed]);

        // Execute
        let running = mock
            .list_tasks(&[("service", "hello-web"), ("desired-state", "running")])
            .await
            .unwrap();
        let both = mock
            .list_tasks(&[
                ("service", "hello-web"),
                ("desired-state", "running"),
                ("desired-state", "shutdown"),
            ])
            .await
            .unwrap();

        // Assert
        assert_eq!(running.len(), 1);
        assert!(running[0].is_running());
        assert_eq!(both.len(), 2);
        assert!(both.iter().any(|t| t.id == "task-failed"));
    }

    #[tokio::test]
    async fn test_update_checks_version() {
        let mock = MockSwarmClient::new("http://mock-swarm");
        let created = mock.create_service(&spec("hello-web", 1)).await.unwrap();

        let stale = mock.update_service(&created.id, 7, &spec("hello-web", 2)).await;
        assert!(matches!(stale, Err(SwarmError::Conflict(_))));

        mock.update_service(&created.id, 1, &spec("hello-web", 2)).await.unwrap();
        let svc = mock.inspect_service("hello-web").await.unwrap();
        assert_eq!(svc.version.index, 2);
        assert_eq!(svc.spec.replicas(), 2);
    }

    #[tokio::test]
    async fn test_list_services_filters_labels() {
        let mock = MockSwarmClient::new("http://mock-swarm");
        mock.create_service(&spec("a", 1)).await.unwrap();
        let mut other = spec("b", 1);
        other.labels.clear();
        mock.create_service(&other).await.unwrap();

        let found = mock.list_services(&[("label", "deployer=LAIN")]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].spec.name, "a");
    }

    #[tokio::test]
    async fn test_remove_missing_service() {
        let mock = MockSwarmClient::new("http://mock-swarm");
        assert!(matches!(mock.remove_service("ghost").await, Err(SwarmError::NotFound(_))));
    }
}
