//! Daemon configuration from environment variables

use crate::error::DaemonError;
use cluster::{ClusterConfig, WatchConfig};
use cluster::config::{DEFAULT_CONVERGENCE_TIMEOUT, DEFAULT_NAMESPACE, DEFAULT_POLL_INTERVAL};
use std::time::Duration;

/// Timeout of a single Swarm manager request
pub const SWARM_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Which cluster API the daemon drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Kubernetes,
    Swarm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub backend: BackendKind,
    /// Swarm manager endpoint, required for the swarm backend
    pub swarm_url: Option<String>,
    pub namespace: String,
    pub poll_interval: Duration,
    pub convergence_timeout: Duration,
}

fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Result<Duration, DaemonError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(DaemonError::InvalidConfig(format!("{key} must be greater than zero"))),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(DaemonError::InvalidConfig(format!("{key}={raw:?}: {e}"))),
    }
}

impl Config {
    /// Read the process environment
    pub fn from_env() -> Result<Self, DaemonError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which returns the value of a variable if set
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DaemonError> {
        let backend = match lookup("DEPLOYD_BACKEND").as_deref().map(str::trim) {
            None | Some("" | "kubernetes") => BackendKind::Kubernetes,
            Some("swarm") => BackendKind::Swarm,
            Some(other) => {
                return Err(DaemonError::InvalidConfig(format!(
                    "DEPLOYD_BACKEND must be kubernetes or swarm, got {other:?}"
                )));
            }
        };

        let swarm_url = lookup("SWARM_URL").filter(|u| !u.trim().is_empty());
        if backend == BackendKind::Swarm && swarm_url.is_none() {
            return Err(DaemonError::InvalidConfig(
                "SWARM_URL environment variable is required for the swarm backend".to_string(),
            ));
        }

        Ok(Self {
            backend,
            swarm_url,
            namespace: lookup("DEPLOYD_NAMESPACE")
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            poll_interval: seconds(&lookup, "DEPLOYD_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL)?,
            convergence_timeout: seconds(&lookup, "DEPLOYD_CONVERGENCE_TIMEOUT_SECS", DEFAULT_CONVERGENCE_TIMEOUT)?,
        })
    }

    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            default_namespace: self.namespace.clone(),
            watch: WatchConfig {
                interval: self.poll_interval,
                timeout: self.convergence_timeout,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.backend, BackendKind::Kubernetes);
        assert_eq!(config.swarm_url, None);
        assert_eq!(config.namespace, "lain");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.convergence_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_swarm_backend() {
        let config = Config::from_lookup(lookup(&[
            ("DEPLOYD_BACKEND", "swarm"),
            ("SWARM_URL", "http://swarm-manager:2375"),
            ("DEPLOYD_NAMESPACE", "apps"),
            ("DEPLOYD_POLL_INTERVAL_SECS", "2"),
            ("DEPLOYD_CONVERGENCE_TIMEOUT_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(config.backend, BackendKind::Swarm);
        assert_eq!(config.swarm_url.as_deref(), Some("http://swarm-manager:2375"));

        let cluster = config.cluster_config();
        assert_eq!(cluster.default_namespace, "apps");
        assert_eq!(cluster.watch.interval, Duration::from_secs(2));
        assert_eq!(cluster.watch.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_values() {
        let missing_url = Config::from_lookup(lookup(&[("DEPLOYD_BACKEND", "swarm")]));
        assert!(matches!(missing_url, Err(DaemonError::InvalidConfig(_))));

        let unknown = Config::from_lookup(lookup(&[("DEPLOYD_BACKEND", "nomad")]));
        assert!(matches!(unknown, Err(DaemonError::InvalidConfig(_))));

        let zero = Config::from_lookup(lookup(&[("DEPLOYD_POLL_INTERVAL_SECS", "0")]));
        assert!(matches!(zero, Err(DaemonError::InvalidConfig(_))));

        let garbage = Config::from_lookup(lookup(&[("DEPLOYD_CONVERGENCE_TIMEOUT_SECS", "soon")]));
        assert!(matches!(garbage, Err(DaemonError::InvalidConfig(ref m)) if m.contains("soon")));
    }
}
