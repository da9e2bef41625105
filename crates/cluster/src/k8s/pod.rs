//! Pod observer
//!
//! Lists the pods of a pod group by its label selector and turns them into
//! observed-state [`PodGroup`] reports.

use super::api::KubeApi;
use crate::error::ClusterError;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use model::{Container, ContainerRuntime, PodGroup, PodGroupSpec};
use std::sync::Arc;
use tracing::debug;

/// How instance numbers are derived from backend pods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    /// Pod names end in `-{ordinal}` (StatefulSet); instance = ordinal + 1
    Ordinal,
    /// Pods are interchangeable (Deployment); numbered by creation order
    CreationOrder,
}

/// Lists pods by label selector
#[derive(Clone)]
pub struct PodObserver {
    api: Arc<dyn KubeApi>,
    namespace: String,
}

impl std::fmt::Debug for PodObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodObserver")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl PodObserver {
    /// Observer for pods in `namespace`
    pub fn new(api: Arc<dyn KubeApi>, namespace: impl Into<String>) -> Self {
        Self {
            api,
            namespace: namespace.into(),
        }
    }

    /// Pods matching the group's label selector, in backend order.
    ///
    /// # Errors
    ///
    /// Backend errors are returned as-is.
    pub async fn inspect(&self, spec: &PodGroupSpec) -> Result<Vec<Pod>, ClusterError> {
        let selector = spec.label_selector();
        let pods = self.api.list_pods(&self.namespace, &selector).await?;
        debug!("{} pods match {} in {}", pods.len(), selector, self.namespace);
        Ok(pods)
    }
}

/// Kubernetes time as a chrono timestamp
#[must_use]
pub fn to_datetime(time: &Time) -> Option<DateTime<Utc>> {
    let raw = serde_json::to_value(time).ok()?;
    DateTime::parse_from_rfc3339(raw.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Containers of a pod, one per reported container status
#[must_use]
pub fn containers(pod: &Pod) -> Vec<Container> {
    let Some(status) = pod.status.as_ref() else {
        return Vec::new();
    };
    let node_name = pod.spec.as_ref().and_then(|s| s.node_name.clone());

    status
        .container_statuses
        .iter()
        .flatten()
        .map(|cs| {
            let running = cs.state.as_ref().and_then(|s| s.running.as_ref());
            Container {
                id: cs.container_id.clone().unwrap_or_default(),
                runtime: ContainerRuntime {
                    image: cs.image.clone(),
                    started_at: running.and_then(|r| r.started_at.as_ref()).and_then(to_datetime),
                    running: running.is_some(),
                },
                container_ip: status.pod_ip.clone(),
                node_ip: status.host_ip.clone(),
                node_name: node_name.clone(),
            }
        })
        .collect()
}

fn ordinal(pod: &Pod) -> Option<u32> {
    let name = pod.metadata.name.as_deref()?;
    let (_, suffix) = name.rsplit_once('-')?;
    suffix.parse::<u32>().ok()?.checked_add(1)
}

/// `(instance_no, containers)` pairs for the live pods.
///
/// Terminating pods are skipped.
#[must_use]
pub fn instances(pods: &[Pod], identity: Identity) -> Vec<(u32, Vec<Container>)> {
    let live = pods.iter().filter(|p| p.metadata.deletion_timestamp.is_none());
    match identity {
        Identity::Ordinal => live.filter_map(|p| Some((ordinal(p)?, containers(p)))).collect(),
        Identity::CreationOrder => {
            let mut ordered: Vec<&Pod> = live.collect();
            ordered.sort_by_cached_key(|p| {
                (
                    p.metadata.creation_timestamp.as_ref().and_then(to_datetime),
                    p.metadata.name.clone(),
                )
            });
            ordered
                .into_iter()
                .zip(1u32..)
                .map(|(p, instance_no)| (instance_no, containers(p)))
                .collect()
        }
    }
}

/// Observed-state report with exactly `num_instances` slots
#[must_use]
pub fn to_pod_group(spec: &PodGroupSpec, pods: &[Pod], identity: Identity) -> PodGroup {
    PodGroup::from_instances(&spec.name, spec.num_instances, instances(pods, identity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::mock::{running_pod, time};
    use k8s_openapi::api::core::v1::{Container as K8sContainer, PodSpec, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn template() -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta::default()),
            spec: Some(PodSpec {
                containers: vec![K8sContainer {
                    name: "ns-web".to_string(),
                    image: Some("hello:1".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        }
    }

    fn spec(num_instances: u32) -> PodGroupSpec {
        PodGroupSpec {
            name: "ns.web".to_string(),
            namespace: "ns".to_string(),
            num_instances,
            ..Default::default()
        }
    }

    #[test]
    fn test_containers_map_status_fields() {
        let pod = running_pod("ns-web-0", "ns", &template(), 0);
        let mapped = containers(&pod);

        assert_eq!(mapped.len(), 1);
        let c = &mapped[0];
        assert_eq!(c.id, "containerd://ns-web-0-ns-web");
        assert_eq!(c.runtime.image, "hello:1");
        assert!(c.runtime.running);
        assert_eq!(
            c.runtime.started_at,
            DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .ok()
                .map(|t| t.with_timezone(&Utc))
        );
        assert_eq!(c.container_ip.as_deref(), Some("10.1.0.1"));
        assert_eq!(c.node_ip.as_deref(), Some("192.168.0.1"));
        assert_eq!(c.node_name.as_deref(), Some("node-1"));
    }

    #[test]
    fn test_pod_without_status_has_no_containers() {
        let mut pod = running_pod("ns-web-0", "ns", &template(), 0);
        pod.status = None;
        assert!(containers(&pod).is_empty());
    }

    #[test]
    fn test_ordinal_identity_is_stable() {
        let pods = vec![
            running_pod("ns-web-2", "ns", &template(), 2),
            running_pod("ns-web-0", "ns", &template(), 0),
            running_pod("ns-web-7", "ns", &template(), 7),
        ];
        let group = to_pod_group(&spec(3), &pods, Identity::Ordinal);

        assert_eq!(group.pods.len(), 3);
        assert!(group.pods[0].is_running());
        assert!(!group.pods[1].is_running());
        assert!(group.pods[2].is_running());
        assert_eq!(group.running_count(), 2);
    }

    #[test]
    fn test_creation_order_identity() {
        let mut late = running_pod("ns-web-aaaa", "ns", &template(), 5);
        late.metadata.creation_timestamp = time("2024-01-01T00:10:00Z");
        let early = running_pod("ns-web-zzzz", "ns", &template(), 1);

        let numbered = instances(&[late, early], Identity::CreationOrder);
        assert_eq!(numbered[0].0, 1);
        assert!(numbered[0].1[0].id.contains("zzzz"));
        assert_eq!(numbered[1].0, 2);
    }

    #[test]
    fn test_extra_pods_are_not_reported() {
        let pods: Vec<Pod> = (0..5)
            .map(|i| running_pod(&format!("ns-web-x{i}"), "ns", &template(), i))
            .collect();
        let group = to_pod_group(&spec(3), &pods, Identity::CreationOrder);

        assert_eq!(group.pods.len(), 3);
        assert_eq!(group.running_count(), 3);
    }

    #[test]
    fn test_terminating_pods_are_skipped() {
        let mut pod = running_pod("ns-web-0", "ns", &template(), 0);
        pod.metadata.deletion_timestamp = time("2024-01-01T01:00:00Z");
        assert!(instances(&[pod], Identity::Ordinal).is_empty());
    }
}
