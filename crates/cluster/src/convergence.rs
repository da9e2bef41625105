//! Convergence wait
//!
//! After a create or upgrade, controllers poll their observer until the number
//! of instances with at least one container equals the desired count. The wait
//! is an explicit state machine driven by a deadline and a shutdown receiver:
//!
//! ```text
//! Pending -> Converging -> Converged
//!                       -> TimedOut
//!                       -> Cancelled
//! ```

use crate::config::WatchConfig;
use crate::error::ClusterError;
use model::PodGroup;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// State of one convergence wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// No poll completed yet
    Pending,
    /// Last poll saw fewer running instances than desired
    Converging {
        /// Running instances at the last poll
        observed: u32,
    },
    /// Desired count reached
    Converged,
    /// Deadline passed
    TimedOut {
        /// Running instances at the last poll
        observed: u32,
    },
    /// Shutdown requested
    Cancelled,
}

impl WatchState {
    /// Whether the wait is over
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::TimedOut { .. } | Self::Cancelled)
    }

    /// Next state after a poll observing `observed` running instances
    #[must_use]
    pub fn after_poll(self, observed: u32, desired: u32, deadline_passed: bool) -> Self {
        if self.is_terminal() {
            return self;
        }
        if observed == desired {
            Self::Converged
        } else if deadline_passed {
            Self::TimedOut { observed }
        } else {
            Self::Converging { observed }
        }
    }
}

/// Resolves once `shutdown` carries `true`; never resolves if the sender is gone
pub async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Poll `inspect` until `desired` instances are running.
///
/// Returns the report of the converging poll. Observer errors stop the wait.
///
/// # Errors
///
/// [`ClusterError::ConvergenceTimeout`] once `config.timeout` has elapsed,
/// [`ClusterError::Cancelled`] when `shutdown` flips to `true`, or the first
/// observer error.
pub async fn wait_for_convergence<F, Fut>(
    name: &str,
    desired: u32,
    config: WatchConfig,
    shutdown: &mut watch::Receiver<bool>,
    mut inspect: F,
) -> Result<PodGroup, ClusterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PodGroup, ClusterError>>,
{
    wait_until(name, desired, config, shutdown, || {
        let poll = inspect();
        async move {
            let group = poll.await?;
            let running = u32::try_from(group.running_count()).unwrap_or(u32::MAX);
            Ok((running, group))
        }
    })
    .await
}

/// Poll until the observed count equals `desired`.
///
/// `poll` yields the observed count together with the value returned on
/// convergence.
///
/// # Errors
///
/// Same as [`wait_for_convergence`].
pub async fn wait_until<T, F, Fut>(
    name: &str,
    desired: u32,
    config: WatchConfig,
    shutdown: &mut watch::Receiver<bool>,
    mut poll: F,
) -> Result<T, ClusterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(u32, T), ClusterError>>,
{
    let started = Instant::now();
    let deadline = started + config.timeout;
    let mut state = WatchState::Pending;

    info!("Waiting for {} to reach {} instances", name, desired);

    loop {
        if *shutdown.borrow() {
            state = WatchState::Cancelled;
        } else {
            let (observed, value) = poll().await?;
            state = state.after_poll(observed, desired, Instant::now() >= deadline);
            debug!("{}: {:?}", name, state);

            match state {
                WatchState::Converged => {
                    info!(
                        "{} converged with {} instances after {:?}",
                        name,
                        desired,
                        started.elapsed()
                    );
                    return Ok(value);
                }
                WatchState::TimedOut { observed } => {
                    let elapsed = started.elapsed();
                    warn!(
                        "{} did not converge: {}/{} instances after {:?}",
                        name, observed, desired, elapsed
                    );
                    return Err(ClusterError::ConvergenceTimeout {
                        name: name.to_string(),
                        desired,
                        observed,
                        elapsed,
                    });
                }
                _ => {}
            }
        }

        if state == WatchState::Cancelled {
            info!("Wait for {} cancelled", name);
            return Err(ClusterError::Cancelled(name.to_string()));
        }

        // Never sleep past the deadline, so the final poll happens on time
        let pause = config.interval.min(deadline.saturating_duration_since(Instant::now()));
        tokio::select! {
            () = tokio::time::sleep(pause.max(Duration::from_millis(1))) => {}
            () = cancelled(shutdown) => state = WatchState::Cancelled,
        }
    }
}
