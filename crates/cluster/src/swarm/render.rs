//! Swarm service renderer
//!
//! A pod group maps onto one replicated Swarm service. Swarm services run a
//! single container per task, so multi-container pods cannot be expressed.

use model::{PodGroupSpec, ValidationError};
use swarm_client::{
    ContainerSpec, EndpointSpec, PortConfig, ReplicatedService, ResourceRequirements, Resources, ServiceMode,
    ServiceSpec, TaskSpec,
};

/// Service-level labels: the selector triple plus the identity annotations
#[must_use]
pub fn service_labels(spec: &PodGroupSpec) -> std::collections::BTreeMap<String, String> {
    let mut labels = spec.pod_labels();
    labels.extend(spec.annotations());
    labels
}

/// Render the desired service.
///
/// # Errors
///
/// [`ValidationError::Unsupported`] unless the pod has exactly one container,
/// [`ValidationError::MalformedEnv`] for an env entry without `=`.
pub fn service_spec(spec: &PodGroupSpec) -> Result<ServiceSpec, ValidationError> {
    let container = match spec.pod.containers.as_slice() {
        [only] => only,
        other => {
            return Err(ValidationError::Unsupported {
                name: spec.name.clone(),
                reason: format!("swarm services run one container per task, got {}", other.len()),
            });
        }
    };
    container.parsed_env(0)?;

    let resources = (container.memory_limit > 0).then(|| {
        let memory = Resources {
            nano_cpus: None,
            memory_bytes: Some(container.memory_limit),
        };
        ResourceRequirements {
            limits: Some(memory.clone()),
            reservations: Some(memory),
        }
    });

    let endpoint_spec = (container.expose > 0).then(|| EndpointSpec {
        ports: vec![PortConfig {
            protocol: "tcp".to_string(),
            target_port: container.expose,
            published_port: Some(container.expose),
        }],
    });

    Ok(ServiceSpec {
        name: spec.object_name(),
        labels: service_labels(spec),
        task_template: TaskSpec {
            container_spec: ContainerSpec {
                image: container.image.clone(),
                command: container.command.clone(),
                env: container.env.clone(),
                labels: spec.pod_labels(),
            },
            resources,
        },
        mode: ServiceMode {
            replicated: Some(ReplicatedService {
                replicas: u64::from(spec.num_instances),
            }),
        },
        endpoint_spec,
    })
}
