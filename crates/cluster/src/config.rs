//! Backend configuration

use std::time::Duration;

/// Default poll interval of the convergence wait
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default deadline of the convergence wait
pub const DEFAULT_CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(300);
/// Namespace used when a spec does not name one
pub const DEFAULT_NAMESPACE: &str = "lain";

/// Convergence wait parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    /// Time between two observer polls
    pub interval: Duration,
    /// Maximum time spent waiting
    pub timeout: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_CONVERGENCE_TIMEOUT,
        }
    }
}

/// Settings shared by every controller built by a facade
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Backend namespace for specs with an empty namespace
    pub default_namespace: String,
    /// Convergence wait parameters
    pub watch: WatchConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            watch: WatchConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Backend namespace for an application namespace
    #[must_use]
    pub fn namespace_for(&self, namespace: &str) -> String {
        if namespace.is_empty() {
            self.default_namespace.clone()
        } else {
            model::sanitize(namespace)
        }
    }
}
