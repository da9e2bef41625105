//! Node capacity and utilization

use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::{BTreeMap, HashMap};

const BINARY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1_048_576.0),
    ("Gi", 1_073_741_824.0),
    ("Ti", 1_099_511_627_776.0),
    ("Pi", 1_125_899_906_842_624.0),
];

const DECIMAL_SUFFIXES: &[(&str, f64)] = &[
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
];

/// Numeric value of a Kubernetes quantity, 0 when unparseable
#[must_use]
pub fn quantity_value(q: &Quantity) -> f64 {
    let raw = q.0.trim();
    for (suffix, factor) in BINARY_SUFFIXES.iter().chain(DECIMAL_SUFFIXES) {
        if let Some(number) = raw.strip_suffix(suffix) {
            return number.parse::<f64>().map_or(0.0, |n| n * factor);
        }
    }
    raw.parse::<f64>().unwrap_or(0.0)
}

#[allow(clippy::cast_possible_truncation, reason = "memory quantities fit in i64")]
fn bytes(q: &Quantity) -> i64 {
    quantity_value(q).round() as i64
}

fn lookup<'a>(map: Option<&'a BTreeMap<String, Quantity>>, key: &str) -> Option<&'a Quantity> {
    map.and_then(|m| m.get(key))
}

#[derive(Default)]
struct Usage {
    containers: u32,
    cpus: f64,
    memory: i64,
}

/// Capacity of every node, with the requests of the pods scheduled on it
#[must_use]
pub fn node_resources(nodes: &[Node], pods: &[Pod]) -> Vec<model::Node> {
    let mut usage: HashMap<&str, Usage> = HashMap::new();
    for pod in pods {
        let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
        if matches!(phase, Some("Succeeded" | "Failed")) {
            continue;
        }
        let Some(spec) = pod.spec.as_ref() else { continue };
        let Some(node) = spec.node_name.as_deref() else { continue };

        let entry = usage.entry(node).or_default();
        for c in &spec.containers {
            entry.containers += 1;
            let requests = c.resources.as_ref().and_then(|r| r.requests.as_ref());
            entry.cpus += lookup(requests, "cpu").map_or(0.0, quantity_value);
            entry.memory += lookup(requests, "memory").map_or(0, bytes);
        }
    }

    nodes
        .iter()
        .map(|node| {
            let name = node.metadata.name.clone().unwrap_or_default();
            let status = node.status.as_ref();
            let addresses = status.and_then(|s| s.addresses.as_ref());
            let address = addresses
                .and_then(|a| a.iter().find(|addr| addr.type_ == "InternalIP").or_else(|| a.first()))
                .map_or_else(|| name.clone(), |addr| addr.address.clone());
            let capacity = status.and_then(|s| s.capacity.as_ref());
            let used = usage.get(name.as_str());

            model::Node {
                address,
                containers: used.map_or(0, |u| u.containers),
                cpus: lookup(capacity, "cpu").map_or(0.0, quantity_value),
                used_cpus: used.map_or(0.0, |u| u.cpus),
                memory: lookup(capacity, "memory").map_or(0, bytes),
                used_memory: used.map_or(0, |u| u.memory),
                name,
            }
        })
        .collect()
}
