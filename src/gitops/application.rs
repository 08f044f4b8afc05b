//! Application status snapshots and per-application classification.
//!
//! The GitOps controller owns Application resources and mutates their status
//! out-of-band; everything here is a read-only snapshot taken at one poll tick.
//! Classification is a pure function of a single snapshot - one application's
//! condition text never influences another application's state.

use serde::{Deserialize, Serialize};

/// Substring in a condition message that marks a stalled reconciliation.
///
/// The controller reports a timed-out reconciliation attempt through free-text
/// condition messages. Matching is isolated here so it can be swapped for a
/// structured condition reason without touching the polling loop.
pub const DEFAULT_STALL_SIGNATURE: &str = "context deadline exceeded";

/// Whether live cluster state matches the declared manifests
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum SyncStatus {
    /// Live state matches the declared manifests
    Synced,
    /// Live state has drifted from the declared manifests
    OutOfSync,
    /// The controller could not determine sync state
    #[default]
    Unknown,
}

impl SyncStatus {
    /// Parse the controller's status string, mapping unrecognized values to Unknown
    pub fn parse(s: &str) -> Self {
        match s {
            "Synced" => Self::Synced,
            "OutOfSync" => Self::OutOfSync,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synced => write!(f, "Synced"),
            Self::OutOfSync => write!(f, "OutOfSync"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Controller's assessment of runtime health, independent of sync state
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum HealthStatus {
    /// Deployed resources are running as expected
    Healthy,
    /// Resources are still rolling out
    Progressing,
    /// Resources are deployed but failing
    Degraded,
    /// The controller could not determine health
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Parse the controller's status string, mapping unrecognized values to Unknown
    pub fn parse(s: &str) -> Self {
        match s {
            "Healthy" => Self::Healthy,
            "Progressing" => Self::Progressing,
            "Degraded" => Self::Degraded,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Progressing => write!(f, "Progressing"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Read-only snapshot of one GitOps-managed Application at a poll tick
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Application {
    /// Application name, unique within the monitored namespace
    pub name: String,
    /// Sync status reported by the controller
    pub sync: SyncStatus,
    /// Health status reported by the controller
    pub health: HealthStatus,
    /// Aggregated condition messages, used only for stall detection
    pub condition_message: String,
    /// Value of the controller's refresh annotation, if a refresh is pending
    pub refresh_annotation: Option<String>,
}

impl Application {
    /// Build a snapshot with the given name and statuses, no conditions
    pub fn new(name: impl Into<String>, sync: SyncStatus, health: HealthStatus) -> Self {
        Self {
            name: name.into(),
            sync,
            health,
            ..Default::default()
        }
    }

    /// Attach a condition message to this snapshot
    pub fn with_condition(mut self, message: impl Into<String>) -> Self {
        self.condition_message = message.into();
        self
    }

    /// Mark this snapshot as having a pending refresh annotation
    pub fn with_refresh_annotation(mut self, value: impl Into<String>) -> Self {
        self.refresh_annotation = Some(value.into());
        self
    }
}

/// Intensity of a requested reconciliation refresh
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshMode {
    /// Re-evaluate against the cached manifest state
    Soft,
    /// Invalidate caches and re-evaluate from scratch
    Hard,
}

impl RefreshMode {
    /// The annotation value written for this refresh mode
    pub fn annotation_value(&self) -> &'static str {
        match self {
            Self::Soft => "soft",
            Self::Hard => "hard",
        }
    }
}

impl std::fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.annotation_value())
    }
}

/// Observed state of one application within a polling session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppState {
    /// Synced and Healthy - counts toward convergence
    Ready,
    /// Not ready and the condition text carries the stall signature
    Stalled,
    /// Not ready, reconciling normally
    Pending,
}

/// Classify one application snapshot.
///
/// Strictly per-application: only this snapshot's own condition text is
/// consulted for the stall signature.
pub fn classify(app: &Application, stall_signature: &str) -> AppState {
    if app.sync == SyncStatus::Synced && app.health == HealthStatus::Healthy {
        return AppState::Ready;
    }
    if app.condition_message.contains(stall_signature) {
        return AppState::Stalled;
    }
    AppState::Pending
}
