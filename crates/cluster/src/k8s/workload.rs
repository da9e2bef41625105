//! Workload controllers
//!
//! A pod group is backed by one workload object: a Deployment for stateless
//! groups, a StatefulSet for stateful ones. Both share the lifecycle in
//! [`KubeWorkloadController`]; what differs per kind lives in
//! [`WorkloadKind`]. [`select`] picks the variant from the spec.

use super::api::KubeApi;
use super::deployment::DeploymentController;
use super::pod::{self, Identity, PodObserver};
use super::service::ServiceController;
use super::statefulset::StatefulSetController;
use crate::config::WatchConfig;
use crate::convergence;
use crate::error::ClusterError;
use model::{PodGroup, PodGroupSpec, ValidationError};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Everything a controller needs from the facade
#[derive(Clone)]
pub struct ControllerContext {
    /// Kubernetes API
    pub api: Arc<dyn KubeApi>,
    /// Backend namespace of the pod group
    pub namespace: String,
    /// Convergence wait parameters
    pub watch_config: WatchConfig,
    /// Flips to `true` on shutdown
    pub shutdown: watch::Receiver<bool>,
}

impl std::fmt::Debug for ControllerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerContext")
            .field("namespace", &self.namespace)
            .field("watch_config", &self.watch_config)
            .finish_non_exhaustive()
    }
}

/// Kind-specific behavior of a workload object
#[async_trait::async_trait]
pub trait WorkloadKind: Sized + Clone + Send + Sync + 'static {
    /// Kubernetes kind, for logs and errors
    const KIND: &'static str;
    /// How pods of this kind map to instance numbers
    const IDENTITY: Identity;
    /// Whether a Service is coupled to the workload
    const HAS_SERVICE: bool;

    /// Build the desired object
    ///
    /// # Errors
    ///
    /// Validation errors from the renderer.
    fn render(spec: &PodGroupSpec, namespace: &str) -> Result<Self, ValidationError>;

    /// Take the spec sub-tree of `rendered`, keeping metadata and status
    fn adopt_spec(&mut self, rendered: &Self);

    /// Set the desired replica count
    fn set_replicas(&mut self, replicas: i32);

    /// Desired replica count
    fn replicas(&self) -> u32;

    async fn get(api: &dyn KubeApi, namespace: &str, name: &str) -> Result<Self, ClusterError>;
    async fn create(api: &dyn KubeApi, namespace: &str, obj: &Self) -> Result<Self, ClusterError>;
    async fn replace(api: &dyn KubeApi, namespace: &str, name: &str, obj: &Self) -> Result<Self, ClusterError>;
    async fn delete(api: &dyn KubeApi, namespace: &str, name: &str) -> Result<(), ClusterError>;
}

/// Lifecycle operations of a pod group's workload
#[async_trait::async_trait]
pub trait WorkloadController: Send + Sync {
    /// Build the desired workload into the controller's template slot.
    ///
    /// # Errors
    ///
    /// [`ClusterError::Validation`] when the spec cannot be rendered.
    fn render(&mut self, spec: &PodGroupSpec) -> Result<(), ClusterError>;

    /// Submit the service (if any) and the workload, then wait for convergence.
    async fn create(&mut self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError>;

    /// Replace the remote workload spec, then wait for convergence.
    async fn upgrade(&mut self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError>;

    /// Scale to zero, wait for the pods to go, then delete. Absence is success.
    async fn remove(&self, spec: &PodGroupSpec) -> Result<(), ClusterError>;

    /// Current observed state.
    async fn inspect(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError>;
}

/// Workload controller shared by every [`WorkloadKind`]
pub struct KubeWorkloadController<W: WorkloadKind> {
    ctx: ControllerContext,
    observer: PodObserver,
    service: ServiceController,
    template: Option<W>,
}

impl<W: WorkloadKind> std::fmt::Debug for KubeWorkloadController<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeWorkloadController")
            .field("kind", &W::KIND)
            .field("namespace", &self.ctx.namespace)
            .finish_non_exhaustive()
    }
}

impl<W: WorkloadKind> KubeWorkloadController<W> {
    /// Controller operating in `ctx.namespace`
    #[must_use]
    pub fn new(ctx: ControllerContext) -> Self {
        let observer = PodObserver::new(Arc::clone(&ctx.api), ctx.namespace.clone());
        let service = ServiceController::new(Arc::clone(&ctx.api), ctx.namespace.clone());
        Self {
            ctx,
            observer,
            service,
            template: None,
        }
    }

    /// Last rendered workload
    #[must_use]
    pub fn template(&self) -> Option<&W> {
        self.template.as_ref()
    }

    fn api(&self) -> &dyn KubeApi {
        self.ctx.api.as_ref()
    }

    fn render_template(&mut self, spec: &PodGroupSpec) -> Result<W, ClusterError> {
        let rendered = W::render(spec, &self.ctx.namespace)?;
        self.template = Some(rendered.clone());
        Ok(rendered)
    }

    async fn observe(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        let pods = self.observer.inspect(spec).await?;
        Ok(pod::to_pod_group(spec, &pods, W::IDENTITY))
    }

    async fn watch(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        let mut shutdown = self.ctx.shutdown.clone();
        let this = self;
        convergence::wait_for_convergence(
            &spec.name,
            spec.num_instances,
            self.ctx.watch_config,
            &mut shutdown,
            move || this.observe(spec),
        )
        .await
    }

    async fn wait_for_drain(&self, spec: &PodGroupSpec) -> Result<(), ClusterError> {
        let mut shutdown = self.ctx.shutdown.clone();
        let observer = &self.observer;
        convergence::wait_until(&spec.name, 0, self.ctx.watch_config, &mut shutdown, move || async move {
            let pods = observer.inspect(spec).await?;
            Ok((u32::try_from(pods.len()).unwrap_or(u32::MAX), ()))
        })
        .await
    }

    /// Apply `change` to `current` and replace it; on a version conflict
    /// re-read once and re-apply.
    async fn replace_with_retry<F>(&self, name: &str, mut current: W, change: F) -> Result<W, ClusterError>
    where
        F: Fn(&mut W) + Send + Sync,
    {
        let ns = &self.ctx.namespace;
        change(&mut current);
        match W::replace(self.api(), ns, name, &current).await {
            Err(e) if e.is_race_lost() => {
                warn!("{} {}/{} changed since it was read, retrying", W::KIND, ns, name);
            }
            other => return other,
        }

        let mut fresh = W::get(self.api(), ns, name).await?;
        change(&mut fresh);
        W::replace(self.api(), ns, name, &fresh).await.map_err(|e| {
            if e.is_race_lost() {
                ClusterError::RaceLost {
                    kind: W::KIND,
                    name: name.to_string(),
                }
            } else {
                e
            }
        })
    }
}

#[async_trait::async_trait]
impl<W: WorkloadKind> WorkloadController for KubeWorkloadController<W> {
    fn render(&mut self, spec: &PodGroupSpec) -> Result<(), ClusterError> {
        self.render_template(spec).map(|_| ())
    }

    async fn create(&mut self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        let workload = self.render_template(spec)?;
        let name = spec.object_name();
        let ns = self.ctx.namespace.clone();

        if W::HAS_SERVICE {
            self.service.create(spec).await?;
        }

        info!("Creating {} {}/{} with {} replicas", W::KIND, ns, name, spec.num_instances);
        W::create(self.api(), &ns, &workload).await?;
        info!("Created {} {}/{}", W::KIND, ns, name);

        self.watch(spec).await
    }

    async fn upgrade(&mut self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        let name = spec.object_name();
        let ns = self.ctx.namespace.clone();

        let remote = W::get(self.api(), &ns, &name).await?;
        let rendered = self.render_template(spec)?;

        if W::HAS_SERVICE {
            self.service.upgrade(spec).await?;
        }

        info!("Updating {} {}/{} to {} replicas", W::KIND, ns, name, spec.num_instances);
        self.replace_with_retry(&name, remote, |w| w.adopt_spec(&rendered))
            .await?;
        info!("Updated {} {}/{}", W::KIND, ns, name);

        self.watch(spec).await
    }

    async fn remove(&self, spec: &PodGroupSpec) -> Result<(), ClusterError> {
        let name = spec.object_name();
        let ns = &self.ctx.namespace;

        let current = match W::get(self.api(), ns, &name).await {
            Ok(w) => Some(w),
            Err(e) if e.is_not_found() => {
                info!("{} {}/{} already absent", W::KIND, ns, name);
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(current) = current {
            info!("Scaling {} {}/{} to zero", W::KIND, ns, name);
            match self.replace_with_retry(&name, current, |w| w.set_replicas(0)).await {
                Ok(_) => self.wait_for_drain(spec).await?,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        if W::HAS_SERVICE {
            self.service.remove(spec).await?;
        }

        match W::delete(self.api(), ns, &name).await {
            Ok(()) => {
                info!("Deleted {} {}/{}", W::KIND, ns, name);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn inspect(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        W::get(self.api(), &self.ctx.namespace, &spec.object_name()).await?;
        self.observe(spec).await
    }
}

/// The workload variant backing a pod group
#[derive(Debug)]
pub enum Workload {
    /// Interchangeable replicas behind a Service
    Stateless(DeploymentController),
    /// Ordered instances with stable names
    Stateful(StatefulSetController),
}

impl Workload {
    /// Deployment-backed controller
    #[must_use]
    pub fn stateless(ctx: ControllerContext) -> Self {
        Self::Stateless(DeploymentController::new(ctx))
    }

    /// StatefulSet-backed controller
    #[must_use]
    pub fn stateful(ctx: ControllerContext) -> Self {
        Self::Stateful(StatefulSetController::new(ctx))
    }

    fn controller(&self) -> &dyn WorkloadController {
        match self {
            Self::Stateless(c) => c,
            Self::Stateful(c) => c,
        }
    }

    fn controller_mut(&mut self) -> &mut dyn WorkloadController {
        match self {
            Self::Stateless(c) => c,
            Self::Stateful(c) => c,
        }
    }
}

/// Pick the controller variant from the spec's statefulness flag
#[must_use]
pub fn select(spec: &PodGroupSpec, ctx: ControllerContext) -> Workload {
    if spec.stateful {
        Workload::stateful(ctx)
    } else {
        Workload::stateless(ctx)
    }
}

#[async_trait::async_trait]
impl WorkloadController for Workload {
    fn render(&mut self, spec: &PodGroupSpec) -> Result<(), ClusterError> {
        self.controller_mut().render(spec)
    }

    async fn create(&mut self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        self.controller_mut().create(spec).await
    }

    async fn upgrade(&mut self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        self.controller_mut().upgrade(spec).await
    }

    async fn remove(&self, spec: &PodGroupSpec) -> Result<(), ClusterError> {
        self.controller().remove(spec).await
    }

    async fn inspect(&self, spec: &PodGroupSpec) -> Result<PodGroup, ClusterError> {
        self.controller().inspect(spec).await
    }
}
