//! GitOps application convergence.
//!
//! The platform installation is declared in a manifest repository and
//! reconciled onto the cluster by an external GitOps controller. This module
//! watches that reconciliation from the outside: snapshot types and
//! classification ([`application`]), adapters over the controller's custom
//! resources ([`source`]), and the polling monitor that gates the
//! installation pipeline until everything is Synced and Healthy ([`monitor`]).

pub mod application;
pub mod monitor;
pub mod source;

pub use application::{classify, AppState, Application, HealthStatus, RefreshMode, SyncStatus};
pub use monitor::{Convergence, ConvergeError, ConvergenceMonitor, MonitorConfig, RefreshPolicy};
pub use source::{ApplicationStatusSource, GitopsApplications, RefreshTrigger, REFRESH_ANNOTATION};
