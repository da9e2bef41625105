//! deployd
//!
//! Applies declarative pod-group specs to a Kubernetes or Swarm cluster:
//! - create / patch: submit the workload and wait until every instance runs
//! - inspect / list: report observed state
//! - remove: scale down and delete
//! - resources: node capacity and usage
//!
//! Reports are printed to stdout as JSON; logs go to stderr.
//!
//! Applied specs are recorded in an in-memory [`MemoryStore`] that lives only
//! as long as this process. Nothing is persisted between invocations, so
//! `inspect` and `list` always read the cluster itself.

mod config;
mod error;
mod runner;

use anyhow::{Context, Result};
use cluster::{Backend, K8sCluster, KubeClientApi, SwarmCluster};
use config::{BackendKind, Config, SWARM_REQUEST_TIMEOUT};
use error::DaemonError;
use model::MemoryStore;
use runner::{Command, Runner};
use std::sync::Arc;
use swarm_client::{SwarmClient, SwarmClientTrait};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

async fn connect(config: &Config, shutdown: watch::Receiver<bool>) -> Result<Backend> {
    let cluster_config = config.cluster_config();
    match config.backend {
        BackendKind::Kubernetes => {
            let api = KubeClientApi::try_default()
                .await
                .context("Failed to build Kubernetes client")?;
            Ok(Backend::Kubernetes(K8sCluster::new(Arc::new(api), cluster_config, shutdown)))
        }
        BackendKind::Swarm => {
            let url = config
                .swarm_url
                .clone()
                .ok_or_else(|| DaemonError::InvalidConfig("SWARM_URL is not set".to_string()))?;
            let client = SwarmClient::new(url, SWARM_REQUEST_TIMEOUT)?;
            client.ping().await.context("Swarm manager is not reachable")?;
            Ok(Backend::Swarm(SwarmCluster::new(Arc::new(client), cluster_config, shutdown)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let command = Command::parse(std::env::args().skip(1))?;
    let config = Config::from_env()?;

    info!("Starting deployd");
    info!("Configuration:");
    info!("  Backend: {:?}", config.backend);
    info!("  Default namespace: {}", config.namespace);
    info!(
        "  Convergence: poll every {:?}, give up after {:?}",
        config.poll_interval, config.convergence_timeout
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling pending waits");
            if shutdown_tx.send(true).is_err() {
                debug!("No wait left to cancel");
            }
        }
    });

    let backend = connect(&config, shutdown_rx).await?;
    info!("Connected to {} backend", backend.name());

    // Scoped to this invocation; see the module docs.
    let store = MemoryStore::new();
    let report = Runner::new(&backend, &store).run(command).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
