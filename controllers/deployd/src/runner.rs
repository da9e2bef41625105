//! Command runner
//!
//! Parses the positional command line and applies it to a [`Cluster`],
//! recording applied specs in the desired-state [`Store`].

use crate::error::DaemonError;
use anyhow::{Context, Result};
use cluster::Cluster;
use model::{PodGroupSpec, Store, StoreError, pod_group_key, set_json};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One daemon invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create(PathBuf),
    Inspect(PathBuf),
    Patch(PathBuf),
    Remove(PathBuf),
    Resources,
    List { show_all: bool, filters: Vec<String> },
}

impl Command {
    /// Parse the arguments following the program name
    pub fn parse<I>(args: I) -> Result<Self, DaemonError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let verb = args
            .next()
            .ok_or_else(|| DaemonError::Usage("missing command".to_string()))?;
        let rest: Vec<String> = args.collect();

        let spec_path = |rest: &[String]| match rest {
            [path] => Ok(PathBuf::from(path)),
            _ => Err(DaemonError::Usage(format!("{verb} expects exactly one spec file"))),
        };

        match verb.as_str() {
            "create" => Ok(Self::Create(spec_path(&rest)?)),
            "inspect" => Ok(Self::Inspect(spec_path(&rest)?)),
            "patch" => Ok(Self::Patch(spec_path(&rest)?)),
            "remove" => Ok(Self::Remove(spec_path(&rest)?)),
            "resources" if rest.is_empty() => Ok(Self::Resources),
            "resources" => Err(DaemonError::Usage("resources takes no arguments".to_string())),
            "list" => {
                let show_all = rest.iter().any(|a| a == "--all");
                let filters = rest.into_iter().filter(|a| a != "--all").collect::<Vec<_>>();
                if let Some(bad) = filters.iter().find(|f| !f.contains('=')) {
                    return Err(DaemonError::Usage(format!("list filter {bad:?} is not key=value")));
                }
                Ok(Self::List { show_all, filters })
            }
            other => Err(DaemonError::Usage(format!("unknown command {other:?}"))),
        }
    }
}

/// Decode a YAML pod-group spec
pub fn parse_spec(raw: &str) -> Result<PodGroupSpec> {
    serde_yaml::from_str(raw).context("Failed to parse pod group spec")
}

async fn load_spec(path: &Path) -> Result<PodGroupSpec> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_spec(&raw).with_context(|| format!("Invalid spec file {}", path.display()))
}

#[derive(Debug, Serialize)]
struct Removed<'a> {
    removed: &'a str,
}

/// Applies commands to a cluster and keeps the store in step
pub struct Runner<'a> {
    cluster: &'a dyn Cluster,
    store: &'a dyn Store,
}

impl std::fmt::Debug for Runner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner").finish_non_exhaustive()
    }
}

impl<'a> Runner<'a> {
    pub fn new(cluster: &'a dyn Cluster, store: &'a dyn Store) -> Self {
        Self { cluster, store }
    }

    /// Run `command`, returning its JSON report
    pub async fn run(&self, command: Command) -> Result<Value> {
        match command {
            Command::Create(path) => self.create(&load_spec(&path).await?).await,
            Command::Inspect(path) => self.inspect(&load_spec(&path).await?).await,
            Command::Patch(path) => self.patch(&load_spec(&path).await?).await,
            Command::Remove(path) => self.remove(&load_spec(&path).await?).await,
            Command::Resources => {
                let nodes = self.cluster.get_resources().await?;
                Ok(serde_json::to_value(nodes)?)
            }
            Command::List { show_all, filters } => {
                let groups = self.cluster.list_pod_groups(show_all, &filters).await?;
                Ok(serde_json::to_value(groups)?)
            }
        }
    }

    pub async fn create(&self, spec: &PodGroupSpec) -> Result<Value> {
        let group = self
            .cluster
            .create_pod_group(spec)
            .await
            .with_context(|| format!("Failed to create pod group {}", spec.name))?;
        self.record(spec).await?;
        Ok(serde_json::to_value(group)?)
    }

    pub async fn inspect(&self, spec: &PodGroupSpec) -> Result<Value> {
        let group = self
            .cluster
            .inspect_pod_group(spec)
            .await
            .with_context(|| format!("Failed to inspect pod group {}", spec.name))?;
        Ok(serde_json::to_value(group)?)
    }

    pub async fn patch(&self, spec: &PodGroupSpec) -> Result<Value> {
        let group = self
            .cluster
            .patch_pod_group(spec)
            .await
            .with_context(|| format!("Failed to patch pod group {}", spec.name))?;
        self.record(spec).await?;
        Ok(serde_json::to_value(group)?)
    }

    pub async fn remove(&self, spec: &PodGroupSpec) -> Result<Value> {
        self.cluster
            .remove_pod_group(spec)
            .await
            .with_context(|| format!("Failed to remove pod group {}", spec.name))?;

        let key = pod_group_key(&spec.namespace, &spec.name);
        match self.store.remove(&key).await {
            Ok(()) | Err(StoreError::NoSuchKey(_)) => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to forget {key}")),
        }
        Ok(serde_json::to_value(Removed { removed: &spec.name })?)
    }

    async fn record(&self, spec: &PodGroupSpec) -> Result<()> {
        let key = pod_group_key(&spec.namespace, &spec.name);
        if let Err(e) = set_json(self.store, &key, spec, false).await {
            warn!("Applied {} but could not record it: {}", spec.name, e);
            return Err(e).with_context(|| format!("Failed to record {key}"));
        }
        info!("Recorded {}", key);
        Ok(())
    }
}
