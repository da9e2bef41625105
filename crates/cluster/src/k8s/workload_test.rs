//! Scenario tests for the Kubernetes backend

#[cfg(test)]
mod tests {
    use crate::config::{ClusterConfig, WatchConfig};
    use crate::error::ClusterError;
    use crate::facade::Cluster;
    use crate::k8s::mock::{MockCall, MockKubeApi, running_pod};
    use crate::k8s::{K8sCluster, render};
    use k8s_openapi::api::core::v1::{Node, NodeStatus};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use model::{ContainerSpec, PodGroupSpec, PodGroupState, PodSpec};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;

    fn web_spec(num_instances: u32) -> PodGroupSpec {
        PodGroupSpec {
            name: "ns.web".to_string(),
            namespace: "ns".to_string(),
            num_instances,
            pod: PodSpec {
                name: "ns.web".to_string(),
                namespace: "ns".to_string(),
                containers: vec![ContainerSpec {
                    image: "registry.lain.local/ns:release-1".to_string(),
                    command: vec!["./web".to_string()],
                    env: vec!["PORT=8080".to_string()],
                    expose: 8080,
                    memory_limit: 128 * 1024 * 1024,
                }],
                volumes: vec![],
            },
            stateful: false,
        }
    }

    fn cluster(mock: &MockKubeApi) -> (K8sCluster, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let config = ClusterConfig {
            default_namespace: "lain".to_string(),
            watch: WatchConfig {
                interval: Duration::from_secs(5),
                timeout: Duration::from_secs(30),
            },
        };
        (K8sCluster::new(Arc::new(mock.clone()), config, rx), tx)
    }

    fn call(verb: &'static str, kind: &'static str, name: &str) -> MockCall {
        MockCall {
            verb,
            kind,
            name: name.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_stateless_pod_group() {
        // Setup
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);

        // Execute
        let group = cluster.create_pod_group(&web_spec(3)).await.unwrap();

        // Assert: service first, then the workload
        assert_eq!(
            mock.calls(),
            vec![call("create", "Service", "ns-web"), call("create", "Deployment", "ns-web")]
        );

        let deployment = mock.deployment("ns", "ns-web").unwrap();
        assert_eq!(deployment.spec.unwrap().replicas, Some(3));

        let service = mock.service("ns", "ns-web").unwrap();
        let ports = service.spec.unwrap().ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 8080);
        assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));

        assert_eq!(group.name, "ns.web");
        assert_eq!(group.state, PodGroupState::Success);
        assert_eq!(group.pods.len(), 3);
        assert_eq!(group.running_count(), 3);
        assert_eq!(
            group.pods.iter().map(|p| p.instance_no).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_returns_at_the_converging_poll() {
        // Setup: pods come up one per poll
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);
        let spec = web_spec(3);
        let template = render::pod_template(&spec).unwrap();
        let pods: Vec<_> = (0..3)
            .map(|i| running_pod(&format!("ns-web-abc-{i}"), "ns", &template, i))
            .collect();
        mock.script_pods(
            "ns",
            &spec.label_selector(),
            vec![pods[..1].to_vec(), pods[..2].to_vec(), pods.clone()],
        );

        // Execute
        let started = tokio::time::Instant::now();
        let group = cluster.create_pod_group(&spec).await.unwrap();

        // Assert: two sleeps between three polls
        assert_eq!(group.running_count(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_times_out_when_pods_never_start() {
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);
        let spec = web_spec(2);
        mock.script_pods("ns", &spec.label_selector(), vec![vec![]]);

        let err = cluster.create_pod_group(&spec).await.unwrap_err();

        match err {
            ClusterError::ConvergenceTimeout { desired, observed, .. } => {
                assert_eq!(desired, 2);
                assert_eq!(observed, 0);
            }
            other => panic!("expected ConvergenceTimeout, got {other:?}"),
        }
        // Objects stay in place for the caller to inspect or remove
        assert!(mock.deployment("ns", "ns-web").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_create() {
        let mock = MockKubeApi::new();
        let (cluster, tx) = cluster(&mock);
        let spec = web_spec(2);
        mock.script_pods("ns", &spec.label_selector(), vec![vec![]]);
        tx.send(true).unwrap();

        let err = cluster.create_pod_group(&spec).await.unwrap_err();
        assert!(matches!(err, ClusterError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_create_rejected_keeps_backend_message() {
        // Setup
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);
        mock.reject_next_create("Deployment", 422, "spec.template.spec.containers[0].image: Required value");

        // Execute
        let err = cluster.create_pod_group(&web_spec(1)).await.unwrap_err();

        // Assert: message verbatim, service not rolled back
        match err {
            ClusterError::Rejected { kind, code, message, .. } => {
                assert_eq!(kind, "Deployment");
                assert_eq!(code, 422);
                assert_eq!(message, "spec.template.spec.containers[0].image: Required value");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
        assert!(mock.service("ns", "ns-web").is_some());
        assert!(mock.deployment("ns", "ns-web").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_existing_group_is_rejected_verbatim() {
        // Setup
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);
        let mut stateful = web_spec(1);
        stateful.name = "ns.db".to_string();
        stateful.stateful = true;
        cluster.create_pod_group(&web_spec(1)).await.unwrap();
        cluster.create_pod_group(&stateful).await.unwrap();

        // Execute
        let service_err = cluster.create_pod_group(&web_spec(1)).await.unwrap_err();
        let workload_err = cluster.create_pod_group(&stateful).await.unwrap_err();

        // Assert: the AlreadyExists answer is not mistaken for a lost race
        assert!(!service_err.is_race_lost());
        match service_err {
            ClusterError::Rejected { kind, code, message, .. } => {
                assert_eq!(kind, "Service");
                assert_eq!(code, 409);
                assert_eq!(message, "services \"ns-web\" already exists");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
        assert!(!workload_err.is_race_lost());
        match workload_err {
            ClusterError::Rejected { kind, code, message, .. } => {
                assert_eq!(kind, "StatefulSet");
                assert_eq!(code, 409);
                assert_eq!(message, "statefulsets.apps \"ns-db\" already exists");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_spec_makes_no_backend_call() {
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);
        let mut spec = web_spec(1);
        spec.pod.containers[0].env.push("BROKEN".to_string());

        let err = cluster.create_pod_group(&spec).await.unwrap_err();
        assert!(matches!(err, ClusterError::Validation(_)));

        let err = cluster.create_pod_group(&web_spec(0)).await.unwrap_err();
        assert!(matches!(err, ClusterError::Validation(_)));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_keeps_resource_version_and_status() {
        // Setup
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);
        cluster.create_pod_group(&web_spec(3)).await.unwrap();
        let before = mock.deployment("ns", "ns-web").unwrap();

        // Execute
        let group = cluster.patch_pod_group(&web_spec(5)).await.unwrap();

        // Assert: the submitted object carries the remote version and status
        let submitted = mock.replaced_deployments();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].metadata.resource_version, before.metadata.resource_version);
        assert_eq!(submitted[0].status, before.status);
        assert_eq!(submitted[0].spec.as_ref().unwrap().replicas, Some(5));

        assert_eq!(group.pods.len(), 5);
        assert_eq!(group.running_count(), 5);
        assert!(mock.calls().contains(&call("replace", "Service", "ns-web")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_retries_one_conflict() {
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);
        cluster.create_pod_group(&web_spec(1)).await.unwrap();
        mock.conflict_next_replaces(1);

        cluster.patch_pod_group(&web_spec(2)).await.unwrap();

        assert_eq!(mock.replaced_deployments().len(), 2);
        assert_eq!(
            mock.deployment("ns", "ns-web").unwrap().spec.unwrap().replicas,
            Some(2)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_second_conflict_is_race_lost() {
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);
        cluster.create_pod_group(&web_spec(1)).await.unwrap();
        mock.conflict_next_replaces(2);

        let err = cluster.patch_pod_group(&web_spec(2)).await.unwrap_err();

        assert!(matches!(err, ClusterError::RaceLost { kind: "Deployment", .. }));
        assert_eq!(
            mock.deployment("ns", "ns-web").unwrap().spec.unwrap().replicas,
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_upgrade_missing_workload_is_not_found() {
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);

        let err = cluster.patch_pod_group(&web_spec(2)).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_remove_without_remote_objects_succeeds() {
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);

        cluster.remove_pod_group(&web_spec(3)).await.unwrap();
        assert!(mock.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_scales_down_before_deleting() {
        // Setup
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);
        cluster.create_pod_group(&web_spec(2)).await.unwrap();

        // Execute
        cluster.remove_pod_group(&web_spec(2)).await.unwrap();

        // Assert
        let calls = mock.calls();
        assert_eq!(
            calls[2..],
            [
                call("replace", "Deployment", "ns-web"),
                call("delete", "Service", "ns-web"),
                call("delete", "Deployment", "ns-web"),
            ]
        );
        assert_eq!(
            mock.replaced_deployments()[0].spec.as_ref().unwrap().replicas,
            Some(0)
        );
        assert!(mock.deployment("ns", "ns-web").is_none());
        assert!(mock.service("ns", "ns-web").is_none());
    }

    #[tokio::test]
    async fn test_inspect_missing_workload_is_not_found() {
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);

        let err = cluster.inspect_pod_group(&web_spec(1)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inspect_reports_empty_slots() {
        // Setup: 3 desired, only ordinal pods 0 and 2 running
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);
        let mut spec = web_spec(3);
        spec.stateful = true;
        cluster.create_pod_group(&spec).await.unwrap();
        let template = render::pod_template(&spec).unwrap();
        mock.script_pods(
            "ns",
            &spec.label_selector(),
            vec![vec![
                running_pod("ns-web-2", "ns", &template, 2),
                running_pod("ns-web-0", "ns", &template, 0),
            ]],
        );

        // Execute
        let group = cluster.inspect_pod_group(&spec).await.unwrap();

        // Assert
        assert_eq!(group.state, PodGroupState::Success);
        assert_eq!(group.pods.len(), 3);
        assert!(group.pods[0].is_running());
        assert!(!group.pods[1].is_running());
        assert!(group.pods[2].is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stateful_group_has_no_service() {
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);
        let mut spec = web_spec(2);
        spec.stateful = true;

        let group = cluster.create_pod_group(&spec).await.unwrap();

        assert_eq!(mock.calls(), vec![call("create", "StatefulSet", "ns-web")]);
        assert!(mock.service("ns", "ns-web").is_none());
        assert_eq!(group.running_count(), 2);

        cluster.remove_pod_group(&spec).await.unwrap();
        assert!(mock.stateful_set("ns", "ns-web").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_namespace_uses_default() {
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);
        let mut spec = web_spec(1);
        spec.namespace = String::new();

        cluster.create_pod_group(&spec).await.unwrap();
        assert!(mock.deployment("lain", "ns-web").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_pod_groups_filters_and_hides_idle_groups() {
        // Setup: one running group, one scaled to zero, one in another app
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);
        cluster.create_pod_group(&web_spec(2)).await.unwrap();

        let mut worker = web_spec(1);
        worker.name = "ns.worker".to_string();
        worker.pod.containers[0].expose = 0;
        cluster.create_pod_group(&worker).await.unwrap();
        let mut idle = mock.deployment("ns", "ns-worker").unwrap();
        idle.spec.as_mut().unwrap().replicas = Some(0);
        mock.insert_deployment("ns", idle);

        let mut other = web_spec(1);
        other.namespace = "other".to_string();
        other.name = "other.web".to_string();
        cluster.create_pod_group(&other).await.unwrap();

        // Execute
        let visible = cluster.list_pod_groups(false, &["app=ns".to_string()]).await.unwrap();
        let all = cluster.list_pod_groups(true, &["app=ns".to_string()]).await.unwrap();

        // Assert
        assert_eq!(visible.iter().map(|g| g.name.as_str()).collect::<Vec<_>>(), vec!["ns.web"]);
        assert_eq!(visible[0].running_count(), 2);
        assert_eq!(
            all.iter().map(|g| g.name.as_str()).collect::<Vec<_>>(),
            vec!["ns.web", "ns.worker"]
        );
        assert!(all[1].pods.is_empty());
    }

    #[tokio::test]
    async fn test_get_resources() {
        let mock = MockKubeApi::new();
        let (cluster, _tx) = cluster(&mock);
        mock.add_node(Node {
            metadata: ObjectMeta {
                name: Some("node-1".to_string()),
                ..Default::default()
            },
            spec: None,
            status: Some(NodeStatus {
                capacity: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity("8".to_string())),
                    ("memory".to_string(), Quantity("16Gi".to_string())),
                ])),
                ..Default::default()
            }),
        });
        let template = render::pod_template(&web_spec(1)).unwrap();
        mock.add_pod(running_pod("ns-web-abc-0", "ns", &template, 0));

        let nodes = cluster.get_resources().await.unwrap();

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "node-1");
        assert_eq!(nodes[0].address, "node-1");
        assert_eq!(nodes[0].containers, 1);
        assert_eq!(nodes[0].used_memory, 128 * 1024 * 1024);
        assert_eq!(nodes[0].memory, 16 * 1024 * 1024 * 1024);
    }
}
