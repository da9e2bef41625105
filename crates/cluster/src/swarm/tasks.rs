//! Task observer mapping
//!
//! Turns the tasks of a Swarm service into an observed-state [`PodGroup`].
//! Task slots are the instance numbers.

use chrono::{DateTime, Utc};
use model::{Container, ContainerRuntime, ErrorSpec, PodGroup, PodGroupSpec, PodGroupState};
use std::collections::HashMap;
use swarm_client::{Node, Task};

fn parse_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw?).ok().map(|t| t.with_timezone(&Utc))
}

/// Address and hostname of every node, keyed by node id
#[must_use]
pub fn node_index(nodes: &[Node]) -> HashMap<&str, &Node> {
    nodes.iter().map(|n| (n.id.as_str(), n)).collect()
}

fn node_name(nodes: &HashMap<&str, &Node>, id: &str) -> String {
    nodes
        .get(id)
        .map(|n| n.description.hostname.as_str())
        .filter(|h| !h.is_empty())
        .unwrap_or(id)
        .to_string()
}

/// The container of a running task
#[must_use]
pub fn container(task: &Task, nodes: &HashMap<&str, &Node>) -> Container {
    Container {
        id: task
            .status
            .container_status
            .as_ref()
            .map(|c| c.container_id.clone())
            .unwrap_or_default(),
        runtime: ContainerRuntime {
            image: task.spec.container_spec.image.clone(),
            started_at: parse_time(task.status.timestamp.as_deref()),
            running: task.is_running(),
        },
        container_ip: task.ip(),
        node_ip: nodes
            .get(task.node_id.as_str())
            .map(|n| n.status.addr.clone())
            .filter(|a| !a.is_empty()),
        node_name: Some(node_name(nodes, &task.node_id)),
    }
}

/// Failure records of failed or rejected tasks, oldest first
#[must_use]
pub fn task_errors(service: &str, tasks: &[Task], nodes: &HashMap<&str, &Node>) -> Vec<ErrorSpec> {
    let mut failed: Vec<&Task> = tasks.iter().filter(|t| t.is_failed()).collect();
    failed.sort_by_key(|t| parse_time(t.status.timestamp.as_deref()));

    failed
        .into_iter()
        .map(|t| ErrorSpec {
            network: t
                .networks_attachments
                .first()
                .map(|n| n.network.spec.name.clone())
                .unwrap_or_default(),
            container_id: t
                .status
                .container_status
                .as_ref()
                .map(|c| c.container_id.clone())
                .unwrap_or_default(),
            container_name: format!("{service}.{}.{}", t.slot.unwrap_or_default(), t.id),
            prev_node: node_name(nodes, &t.node_id),
            prev_ip: t.ip().unwrap_or_default(),
            message: t.status.err.clone().unwrap_or_else(|| t.status.message.clone()),
        })
        .collect()
}

/// Observed state of a pod group from its service's tasks
#[must_use]
pub fn to_pod_group(spec: &PodGroupSpec, tasks: &[Task], nodes: &[Node]) -> PodGroup {
    let nodes = node_index(nodes);
    let instances = tasks.iter().filter(|t| t.is_running()).filter_map(|t| {
        let slot = u32::try_from(t.slot?).ok()?;
        Some((slot, vec![container(t, &nodes)]))
    });

    let mut group = PodGroup::from_instances(&spec.name, spec.num_instances, instances);
    let errors = task_errors(&spec.object_name(), tasks, &nodes);
    if let Some(latest) = errors.last() {
        group.last_error = Some(latest.message.clone());
        if group.running_count() == 0 {
            group.state = PodGroupState::Fail;
        }
    }
    group
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_client::{ContainerStatus, NodeDescription, NodeStatus, TaskStatus};

    fn node() -> Node {
        Node {
            id: "n1".to_string(),
            description: NodeDescription {
                hostname: "worker-1".to_string(),
                ..Default::default()
            },
            status: NodeStatus {
                state: "ready".to_string(),
                addr: "192.168.10.5".to_string(),
            },
            ..Default::default()
        }
    }

    fn task(id: &str, slot: u64, state: &str, timestamp: &str, message: &str) -> Task {
        Task {
            id: id.to_string(),
            node_id: "n1".to_string(),
            slot: Some(slot),
            status: TaskStatus {
                timestamp: Some(timestamp.to_string()),
                state: state.to_string(),
                message: message.to_string(),
                err: None,
                container_status: Some(ContainerStatus {
                    container_id: format!("ctr-{id}"),
                    pid: 1,
                }),
            },
            desired_state: "running".to_string(),
            ..Default::default()
        }
    }

    fn spec(num_instances: u32) -> PodGroupSpec {
        PodGroupSpec {
            name: "hello.web".to_string(),
            namespace: "hello".to_string(),
            num_instances,
            ..Default::default()
        }
    }

    #[test]
    fn test_running_tasks_fill_slots() {
        let tasks = vec![
            task("a", 2, "running", "2024-03-01T10:00:00Z", "started"),
            task("b", 1, "running", "2024-03-01T10:00:01Z", "started"),
            task("c", 4, "running", "2024-03-01T10:00:02Z", "started"),
        ];

        let group = to_pod_group(&spec(3), &tasks, &[node()]);

        assert_eq!(group.state, PodGroupState::Success);
        assert_eq!(group.pods.len(), 3);
        assert_eq!(group.pods[0].containers[0].id, "ctr-b");
        assert_eq!(group.pods[1].containers[0].id, "ctr-a");
        assert!(!group.pods[2].is_running());
        let c = &group.pods[0].containers[0];
        assert_eq!(c.node_name.as_deref(), Some("worker-1"));
        assert_eq!(c.node_ip.as_deref(), Some("192.168.10.5"));
        assert!(c.runtime.running);
        assert!(c.runtime.started_at.is_some());
    }

    #[test]
    fn test_failed_tasks_set_last_error() {
        let mut rejected = task("r", 1, "rejected", "2024-03-01T10:00:05Z", "preparing");
        rejected.status.err = Some("no suitable node".to_string());
        let tasks = vec![
            rejected,
            task("f", 1, "failed", "2024-03-01T10:00:01Z", "task: non-zero exit (1)"),
        ];

        let group = to_pod_group(&spec(1), &tasks, &[node()]);

        assert_eq!(group.state, PodGroupState::Fail);
        assert_eq!(group.last_error.as_deref(), Some("no suitable node"));
        assert_eq!(group.running_count(), 0);
    }

    #[test]
    fn test_failure_beside_running_task_keeps_success() {
        let tasks = vec![
            task("f", 1, "failed", "2024-03-01T10:00:01Z", "task: non-zero exit (1)"),
            task("a", 1, "running", "2024-03-01T10:00:02Z", "started"),
        ];

        let group = to_pod_group(&spec(1), &tasks, &[node()]);

        assert_eq!(group.state, PodGroupState::Success);
        assert_eq!(group.last_error.as_deref(), Some("task: non-zero exit (1)"));
    }

    #[test]
    fn test_task_errors_record_container_identity() {
        let mut failed = task("f", 2, "failed", "2024-03-01T10:00:01Z", "no sandbox present");
        failed.networks_attachments = vec![swarm_client::NetworkAttachment {
            network: swarm_client::AttachedNetwork {
                id: "net".to_string(),
                spec: swarm_client::NetworkSpec {
                    name: "lain".to_string(),
                },
            },
            addresses: vec!["10.0.0.9/24".to_string()],
        }];
        let nodes = [node()];

        let errors = task_errors("hello-web", &[failed], &node_index(&nodes));

        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0],
            ErrorSpec {
                network: "lain".to_string(),
                container_id: "ctr-f".to_string(),
                container_name: "hello-web.2.f".to_string(),
                prev_node: "worker-1".to_string(),
                prev_ip: "10.0.0.9".to_string(),
                message: "no sandbox present".to_string(),
            }
        );
    }
}
