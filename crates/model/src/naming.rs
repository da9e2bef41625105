//! Backend object naming and label selectors
//!
//! Backend object names may not contain dots, so every name derived from a
//! pod-group spec goes through [`sanitize`]. The label triple built here is the
//! only thing binding a spec to its runtime objects.

use std::collections::BTreeMap;

/// Label key carrying the sanitized application namespace
pub const LABEL_APP: &str = "app";
/// Label key carrying the sanitized pod-group name
pub const LABEL_PROC: &str = "proc";
/// Label key marking objects owned by this daemon
pub const LABEL_DEPLOYER: &str = "deployer";
/// Fixed value of the deployer label
pub const DEPLOYER: &str = "LAIN";

/// Annotation keeping the original (dotted) pod-group name on workload objects
pub const ANNOTATION_POD_GROUP: &str = "deployd.lain/pod-group";
/// Annotation keeping the original application namespace on workload objects
pub const ANNOTATION_NAMESPACE: &str = "deployd.lain/namespace";

/// Replace every "." with "-".
///
/// Idempotent: `sanitize(&sanitize(x)) == sanitize(x)`.
#[must_use]
pub fn sanitize(name: &str) -> String {
    name.replace('.', "-")
}

/// Labels selecting the pods of one pod group (app + proc).
#[must_use]
pub fn selector_labels(namespace: &str, name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APP.to_string(), sanitize(namespace)),
        (LABEL_PROC.to_string(), sanitize(name)),
    ])
}

/// Full label triple stamped on pods and workload objects.
#[must_use]
pub fn pod_labels(namespace: &str, name: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(namespace, name);
    labels.insert(LABEL_DEPLOYER.to_string(), DEPLOYER.to_string());
    labels
}

/// Comma-separated `key=value` selector string, deployer first.
#[must_use]
pub fn label_selector(namespace: &str, name: &str) -> String {
    format!(
        "{}={},{}={},{}={}",
        LABEL_DEPLOYER,
        DEPLOYER,
        LABEL_APP,
        sanitize(namespace),
        LABEL_PROC,
        sanitize(name)
    )
}
