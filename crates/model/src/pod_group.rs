//! Observed-state report types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary state of a pod group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodGroupState {
    /// Not yet observed
    #[default]
    Pending,
    /// Backend call succeeded
    Success,
    /// Backend reported a failure
    Fail,
}

/// Observed state of one deployed pod group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodGroup {
    /// Pod-group name (unsanitized)
    pub name: String,

    /// Summary state
    pub state: PodGroupState,

    /// Last backend error message, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Exactly one entry per desired instance
    pub pods: Vec<Pod>,
}

/// One instance slot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    /// 1-based instance number
    pub instance_no: u32,

    /// Empty when the backend has not reported container statuses
    pub containers: Vec<Container>,
}

/// A running (or starting) container of an instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Backend container id
    pub id: String,
    /// Runtime detail
    pub runtime: ContainerRuntime,
    /// Container (pod) IP
    #[serde(default)]
    pub container_ip: Option<String>,
    /// Host IP
    #[serde(default)]
    pub node_ip: Option<String>,
    /// Host name
    #[serde(default)]
    pub node_name: Option<String>,
}

/// Runtime detail of a container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerRuntime {
    /// Image actually running
    pub image: String,
    /// Start time, when running
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Whether the container is running
    pub running: bool,
}

/// Capacity and utilization of one backend node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node name
    pub name: String,
    /// Reachable address
    pub address: String,
    /// Containers scheduled on the node
    pub containers: u32,
    /// CPU capacity in cores
    pub cpus: f64,
    /// CPU reserved by scheduled containers, in cores
    pub used_cpus: f64,
    /// Memory capacity in bytes
    pub memory: i64,
    /// Memory reserved by scheduled containers, in bytes
    pub used_memory: i64,
}

impl Pod {
    /// Whether at least one container has been reported
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.containers.is_empty()
    }
}

impl PodGroup {
    /// Assemble a report with exactly `num_instances` slots.
    ///
    /// `instances` yields `(instance_no, containers)` pairs. Numbers outside
    /// `1..=num_instances` are dropped, duplicates keep the first entry, and
    /// slots nobody claimed stay empty.
    #[must_use]
    pub fn from_instances<I>(name: &str, num_instances: u32, instances: I) -> Self
    where
        I: IntoIterator<Item = (u32, Vec<Container>)>,
    {
        let mut pods: Vec<Pod> = (1..=num_instances)
            .map(|instance_no| Pod {
                instance_no,
                containers: Vec::new(),
            })
            .collect();
        let mut claimed = vec![false; pods.len()];

        for (instance_no, containers) in instances {
            let Some(idx) = (instance_no as usize).checked_sub(1) else {
                continue;
            };
            if let (Some(slot), Some(taken)) = (pods.get_mut(idx), claimed.get_mut(idx)) {
                if !*taken {
                    slot.containers = containers;
                    *taken = true;
                }
            }
        }

        Self {
            name: name.to_string(),
            state: PodGroupState::Success,
            last_error: None,
            pods,
        }
    }

    /// Number of instances with at least one container
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.pods.iter().filter(|p| p.is_running()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_container(id: &str) -> Vec<Container> {
        vec![Container {
            id: id.to_string(),
            ..Default::default()
        }]
    }

    #[test]
    fn test_from_instances_fills_missing_slots() {
        let group = PodGroup::from_instances("ns.web", 3, vec![(2, one_container("b"))]);

        assert_eq!(group.pods.len(), 3);
        assert_eq!(
            group.pods.iter().map(|p| p.instance_no).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(!group.pods[0].is_running());
        assert_eq!(group.pods[1].containers[0].id, "b");
        assert_eq!(group.running_count(), 1);
    }

    #[test]
    fn test_from_instances_drops_out_of_range_and_duplicates() {
        let group = PodGroup::from_instances(
            "ns.web",
            2,
            vec![
                (0, one_container("zero")),
                (1, one_container("first")),
                (1, one_container("dup")),
                (3, one_container("extra")),
            ],
        );

        assert_eq!(group.pods.len(), 2);
        assert_eq!(group.pods[0].containers[0].id, "first");
        assert!(group.pods[1].containers.is_empty());
    }

    #[test]
    fn test_from_instances_zero_instances() {
        let group = PodGroup::from_instances("ns.web", 0, vec![(1, one_container("a"))]);
        assert!(group.pods.is_empty());
        assert_eq!(group.state, PodGroupState::Success);
    }
}
