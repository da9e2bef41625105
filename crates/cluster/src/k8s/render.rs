//! Resource renderer
//!
//! Pure translation of a [`PodGroupSpec`] into Kubernetes object shapes. No
//! I/O happens here; controllers submit what these functions build.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use model::{PodGroupSpec, ValidationError};
use std::collections::BTreeMap;

/// Replica count as the API server expects it
///
/// # Errors
///
/// [`ValidationError::Unsupported`] when the count does not fit in an `i32`.
pub fn replicas(spec: &PodGroupSpec) -> Result<i32, ValidationError> {
    i32::try_from(spec.num_instances).map_err(|_| ValidationError::Unsupported {
        name: spec.name.clone(),
        reason: format!("{} instances exceed the replica limit", spec.num_instances),
    })
}

/// Object metadata shared by the workload and its service
#[must_use]
pub fn object_meta(spec: &PodGroupSpec, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(spec.object_name()),
        namespace: Some(namespace.to_string()),
        labels: Some(spec.pod_labels()),
        annotations: Some(spec.annotations()),
        ..Default::default()
    }
}

fn memory_resources(limit: i64) -> Option<ResourceRequirements> {
    if limit <= 0 {
        return None;
    }
    let quantity = BTreeMap::from([("memory".to_string(), Quantity(limit.to_string()))]);
    Some(ResourceRequirements {
        limits: Some(quantity.clone()),
        requests: Some(quantity),
        ..Default::default()
    })
}

/// One container per container spec, in order.
///
/// The first container carries the object name, later ones get a `-{index}`
/// suffix.
///
/// # Errors
///
/// [`ValidationError::MalformedEnv`] for an env entry without `=`.
pub fn containers(spec: &PodGroupSpec) -> Result<Vec<Container>, ValidationError> {
    let base = spec.object_name();
    spec.pod
        .containers
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let env = c
                .parsed_env(i)?
                .into_iter()
                .map(|(name, value)| EnvVar {
                    name,
                    value: Some(value),
                    ..Default::default()
                })
                .collect::<Vec<_>>();

            let ports = (c.expose > 0).then(|| {
                vec![ContainerPort {
                    container_port: i32::from(c.expose),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]
            });

            Ok(Container {
                name: if i == 0 { base.clone() } else { format!("{base}-{i}") },
                image: Some(c.image.clone()),
                command: (!c.command.is_empty()).then(|| c.command.clone()),
                env: (!env.is_empty()).then_some(env),
                ports,
                resources: memory_resources(c.memory_limit),
                ..Default::default()
            })
        })
        .collect()
}

/// Pod template stamped with the label triple
///
/// # Errors
///
/// Propagates container rendering errors.
pub fn pod_template(spec: &PodGroupSpec) -> Result<PodTemplateSpec, ValidationError> {
    Ok(PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(spec.pod_labels()),
            annotations: Some(spec.annotations()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: containers(spec)?,
            volumes: Some(Vec::new()),
            ..Default::default()
        }),
    })
}

fn selector(spec: &PodGroupSpec) -> LabelSelector {
    LabelSelector {
        match_labels: Some(spec.pod_labels()),
        ..Default::default()
    }
}

/// Deployment for a stateless pod group
///
/// # Errors
///
/// Propagates validation errors from the pod template.
pub fn deployment(spec: &PodGroupSpec, namespace: &str) -> Result<Deployment, ValidationError> {
    Ok(Deployment {
        metadata: object_meta(spec, namespace),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas(spec)?),
            selector: selector(spec),
            template: pod_template(spec)?,
            ..Default::default()
        }),
        status: None,
    })
}

/// StatefulSet for a stateful pod group
///
/// # Errors
///
/// Propagates validation errors from the pod template.
pub fn stateful_set(spec: &PodGroupSpec, namespace: &str) -> Result<StatefulSet, ValidationError> {
    let name = spec.object_name();
    Ok(StatefulSet {
        metadata: object_meta(spec, namespace),
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas(spec)?),
            selector: selector(spec),
            service_name: name.into(),
            template: pod_template(spec)?,
            ..Default::default()
        }),
        status: None,
    })
}

/// One TCP port per container that exposes one
#[must_use]
pub fn service_ports(spec: &PodGroupSpec) -> Vec<ServicePort> {
    let base = spec.object_name();
    spec.pod
        .containers
        .iter()
        .enumerate()
        .filter(|(_, c)| c.expose > 0)
        .map(|(i, c)| ServicePort {
            name: Some(format!("{base}-{i}-{}", c.expose)),
            protocol: Some("TCP".to_string()),
            port: i32::from(c.expose),
            target_port: Some(IntOrString::Int(i32::from(c.expose))),
            ..Default::default()
        })
        .collect()
}

/// Service selecting the group's pods by app and proc.
///
/// Without any exposed port the service is headless.
#[must_use]
pub fn service(spec: &PodGroupSpec, namespace: &str) -> Service {
    let ports = service_ports(spec);
    let cluster_ip = ports.is_empty().then(|| "None".to_string());
    Service {
        metadata: object_meta(spec, namespace),
        spec: Some(ServiceSpec {
            selector: Some(spec.selector_labels()),
            ports: Some(ports),
            cluster_ip,
            ..Default::default()
        }),
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{ContainerSpec, PodSpec as ModelPodSpec};

    fn spec(containers: Vec<ContainerSpec>) -> PodGroupSpec {
        PodGroupSpec {
            name: "ns.web".to_string(),
            namespace: "ns".to_string(),
            num_instances: 3,
            pod: ModelPodSpec {
                name: "ns.web".to_string(),
                namespace: "ns".to_string(),
                containers,
                volumes: vec![],
            },
            stateful: false,
        }
    }

    fn container(expose: u16, env: &[&str]) -> ContainerSpec {
        ContainerSpec {
            image: "hello:1".to_string(),
            command: vec!["./run".to_string()],
            env: env.iter().map(|s| (*s).to_string()).collect(),
            expose,
            memory_limit: 64 * 1024 * 1024,
        }
    }

    #[test]
    fn test_container_count_matches_spec() {
        let s = spec(vec![container(8080, &[]), container(0, &[]), container(9090, &[])]);
        let rendered = containers(&s).unwrap();

        assert_eq!(rendered.len(), 3);
        assert_eq!(rendered[0].name, "ns-web");
        assert_eq!(rendered[1].name, "ns-web-1");
        assert_eq!(rendered[2].name, "ns-web-2");
        assert!(rendered.iter().all(|c| !c.name.contains('.')));
    }

    #[test]
    fn test_expose_drives_ports() {
        let s = spec(vec![container(0, &[]), container(8080, &[])]);
        let rendered = containers(&s).unwrap();

        assert!(rendered[0].ports.is_none());
        let ports = rendered[1].ports.as_ref().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].container_port, 8080);
        assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));
    }

    #[test]
    fn test_env_is_split_on_first_equals() {
        let s = spec(vec![container(0, &["K=V", "URL=a=b"])]);
        let env = containers(&s).unwrap()[0].env.clone().unwrap();

        assert_eq!(env[0].name, "K");
        assert_eq!(env[0].value.as_deref(), Some("V"));
        assert_eq!(env[1].name, "URL");
        assert_eq!(env[1].value.as_deref(), Some("a=b"));
    }

    #[test]
    fn test_malformed_env_is_a_validation_error() {
        let s = spec(vec![container(0, &["NOSEPARATOR"])]);
        assert!(matches!(containers(&s), Err(ValidationError::MalformedEnv { .. })));
        assert!(deployment(&s, "ns").is_err());
    }

    #[test]
    fn test_memory_request_equals_limit() {
        let s = spec(vec![container(0, &[]), ContainerSpec::default()]);
        let rendered = containers(&s).unwrap();

        let resources = rendered[0].resources.as_ref().unwrap();
        assert_eq!(resources.limits, resources.requests);
        assert_eq!(
            resources.limits.as_ref().unwrap()["memory"],
            Quantity((64 * 1024 * 1024).to_string())
        );
        assert!(rendered[1].resources.is_none());
    }

    #[test]
    fn test_deployment_shape() {
        let s = spec(vec![container(8080, &[])]);
        let d = deployment(&s, "ns").unwrap();

        assert_eq!(d.metadata.name.as_deref(), Some("ns-web"));
        let d_spec = d.spec.unwrap();
        assert_eq!(d_spec.replicas, Some(3));
        let match_labels = d_spec.selector.match_labels.unwrap();
        assert_eq!(match_labels["app"], "ns");
        assert_eq!(match_labels["proc"], "ns-web");
        assert_eq!(match_labels["deployer"], "LAIN");
        let pod = d_spec.template.spec.unwrap();
        assert_eq!(pod.volumes, Some(vec![]));
        assert_eq!(
            d.metadata.annotations.unwrap()[model::ANNOTATION_POD_GROUP],
            "ns.web"
        );
    }

    #[test]
    fn test_service_ports_and_selector() {
        let s = spec(vec![container(8080, &[]), container(0, &[])]);
        let svc = service(&s, "ns");
        let svc_spec = svc.spec.unwrap();

        let ports = svc_spec.ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 8080);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(8080)));
        assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));

        let selector = svc_spec.selector.unwrap();
        assert_eq!(selector.len(), 2);
        assert_eq!(selector["app"], "ns");
        assert_eq!(selector["proc"], "ns-web");
        assert!(svc_spec.cluster_ip.is_none());
    }

    #[test]
    fn test_service_without_ports_is_headless() {
        let s = spec(vec![container(0, &[])]);
        let svc_spec = service(&s, "ns").spec.unwrap();
        assert_eq!(svc_spec.cluster_ip.as_deref(), Some("None"));
    }
}
