//! Deployment convergence monitor.
//!
//! Polls the application status source until every application in the
//! monitored namespace reports Synced and Healthy, nudging stalled
//! reconciliations with a targeted refresh. The loop is deadline-bounded and
//! cancellable; per-tick errors are absorbed and retried, only the deadline or
//! cancellation end the wait early.
//!
//! Single-owner: the dispatch-tracking state is not shared, so exactly one
//! monitor may poll a given application set at a time.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gitops::application::{
    classify, AppState, Application, RefreshMode, DEFAULT_STALL_SIGNATURE,
};
use crate::gitops::source::{ApplicationStatusSource, RefreshTrigger};

/// Configuration for one convergence wait
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Namespace holding the GitOps Application resources
    pub scope: String,
    /// Pause between polls; must be greater than zero
    pub poll_interval: Duration,
    /// Maximum wall-clock time to wait before giving up
    pub deadline: Duration,
    /// Substring in condition messages that marks a stalled reconciliation
    pub stall_signature: String,
    /// Fail with [`ConvergeError::SourceUnavailable`] after this many
    /// consecutive failed status fetches; 0 disables the cap so transient
    /// fetch errors only surface through the deadline
    pub max_consecutive_fetch_failures: u32,
}

impl MonitorConfig {
    /// Create a config, validating the poll interval.
    ///
    /// An interval of zero would hot-loop against the cluster API and is
    /// rejected up front as a configuration error.
    pub fn new(
        scope: impl Into<String>,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Result<Self, crate::Error> {
        if poll_interval.is_zero() {
            return Err(crate::Error::config("poll interval must be greater than zero"));
        }
        Ok(Self {
            scope: scope.into(),
            poll_interval,
            deadline,
            stall_signature: DEFAULT_STALL_SIGNATURE.to_string(),
            max_consecutive_fetch_failures: 0,
        })
    }

    /// Override the stall-detection signature
    pub fn with_stall_signature(mut self, signature: impl Into<String>) -> Self {
        self.stall_signature = signature.into();
        self
    }

    /// Enable hard failure after N consecutive failed status fetches
    pub fn with_fetch_failure_cap(mut self, cap: u32) -> Self {
        self.max_consecutive_fetch_failures = cap;
        self
    }
}

/// Successful convergence outcome
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Convergence {
    /// Number of poll ticks taken, including the final one
    pub ticks: u32,
}

/// Terminal failure of one convergence wait
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Deadline elapsed with applications still not ready
    #[error("deadline of {deadline:?} exceeded; applications not ready: {}", pending.join(", "))]
    Timeout {
        /// The configured deadline that elapsed
        deadline: Duration,
        /// Names of applications not Ready at the final tick
        pending: Vec<String>,
    },

    /// The caller cancelled the wait
    #[error("convergence wait cancelled")]
    Cancelled,

    /// The status source failed too many consecutive polls
    #[error("status source unreachable for {failures} consecutive polls: {last_error}")]
    SourceUnavailable {
        /// Number of consecutive failed fetches
        failures: u32,
        /// The last fetch error observed
        last_error: String,
    },
}

/// Tracks refresh dispatches so each stall episode triggers exactly one.
///
/// Keyed by application name; the entry lives from dispatch until a status
/// fetch shows the application no longer classified Stalled, at which point
/// the application is re-armed for a future episode. This map is the only
/// mutable state the monitor owns.
#[derive(Debug, Default)]
pub struct RefreshPolicy {
    dispatched: HashMap<String, Instant>,
}

impl RefreshPolicy {
    /// Whether a refresh should be dispatched for this stalled application.
    ///
    /// Suppressed while our own dispatch is outstanding, and while the
    /// controller's refresh annotation is still present on the resource
    /// (a previously-issued refresh has not been processed yet).
    pub fn should_refresh(&self, app: &Application) -> bool {
        !self.dispatched.contains_key(&app.name) && app.refresh_annotation.is_none()
    }

    /// Record that a refresh was dispatched for the named application
    pub fn record_dispatched(&mut self, name: &str) {
        self.dispatched.insert(name.to_string(), Instant::now());
    }

    /// Note that the named application is no longer stalled, re-arming it
    pub fn observe_cleared(&mut self, name: &str) {
        self.dispatched.remove(name);
    }

    /// Number of dispatches currently outstanding
    pub fn outstanding(&self) -> usize {
        self.dispatched.len()
    }
}

/// Polls application status until the whole set converges
///
/// See the module docs for loop semantics. Construct with the production
/// [`GitopsApplications`](crate::gitops::source::GitopsApplications) adapter
/// for both parameters, or with fakes/mocks in tests.
pub struct ConvergenceMonitor<S, T> {
    source: S,
    trigger: T,
    config: MonitorConfig,
    policy: RefreshPolicy,
}

impl<S, T> ConvergenceMonitor<S, T>
where
    S: ApplicationStatusSource,
    T: RefreshTrigger,
{
    /// Create a monitor over the given source and trigger
    pub fn new(source: S, trigger: T, config: MonitorConfig) -> Self {
        Self {
            source,
            trigger,
            config,
            policy: RefreshPolicy::default(),
        }
    }

    /// Wait until every application is Synced and Healthy.
    ///
    /// Returns [`Convergence`] once a fetch shows zero not-Ready applications
    /// (the sole success exit - an empty set converges immediately).
    /// Returns within one poll interval of `cancel` firing.
    pub async fn wait_for_convergence(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Convergence, ConvergeError> {
        let start = Instant::now();
        let mut ticks: u32 = 0;
        let mut consecutive_failures: u32 = 0;
        // Names from the last successful fetch, reported on timeout even if
        // the final tick's fetch failed.
        let mut last_pending: Vec<String> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                return Err(ConvergeError::Cancelled);
            }
            ticks += 1;

            match self.source.list_applications(&self.config.scope).await {
                Ok(apps) => {
                    consecutive_failures = 0;

                    // Full snapshot is classified before any dispatch decision.
                    let classified: Vec<(AppState, &Application)> = apps
                        .iter()
                        .map(|app| (classify(app, &self.config.stall_signature), app))
                        .collect();

                    for (state, app) in &classified {
                        if *state != AppState::Stalled {
                            self.policy.observe_cleared(&app.name);
                        }
                    }

                    for (state, app) in &classified {
                        if *state == AppState::Stalled && self.policy.should_refresh(app) {
                            match self
                                .trigger
                                .refresh(&self.config.scope, &app.name, RefreshMode::Soft)
                                .await
                            {
                                Ok(()) => {
                                    info!(application = %app.name, "Dispatched refresh for stalled application");
                                    self.policy.record_dispatched(&app.name);
                                }
                                Err(e) => {
                                    // One application's failed refresh must not
                                    // block the rest of the set; retried next tick.
                                    warn!(application = %app.name, error = %e, "Refresh dispatch failed");
                                }
                            }
                        }
                    }

                    let pending: Vec<String> = classified
                        .iter()
                        .filter(|(state, _)| *state != AppState::Ready)
                        .map(|(_, app)| app.name.clone())
                        .collect();

                    if pending.is_empty() {
                        info!(ticks, "All applications are synced and healthy");
                        return Ok(Convergence { ticks });
                    }

                    debug!(
                        tick = ticks,
                        not_ready = pending.len(),
                        "Waiting for application sync"
                    );
                    last_pending = pending;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        error = %e,
                        failures = consecutive_failures,
                        "Status fetch failed, retrying next tick"
                    );
                    if self.config.max_consecutive_fetch_failures > 0
                        && consecutive_failures >= self.config.max_consecutive_fetch_failures
                    {
                        return Err(ConvergeError::SourceUnavailable {
                            failures: consecutive_failures,
                            last_error: e.to_string(),
                        });
                    }
                }
            }

            if start.elapsed() >= self.config.deadline {
                return Err(ConvergeError::Timeout {
                    deadline: self.config.deadline,
                    pending: last_pending,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ConvergeError::Cancelled),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}
