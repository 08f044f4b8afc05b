//! Gantry - provisioning and convergence harness for GitOps-managed platforms
//!
//! Gantry is the e2e glue that stands a multi-component platform up on a
//! Kubernetes/OpenShift cluster and decides when it is actually ready: it
//! clones the GitOps manifest repository, runs the platform bootstrap script,
//! waits for every declared Application to converge, and seeds the
//! credentials later test suites depend on.
//!
//! The interesting piece is the convergence monitor: a deadline-bounded
//! polling loop that classifies each application from live status snapshots
//! and nudges stalled reconciliations with a targeted refresh. Everything
//! else is sequential orchestration around external collaborators (git, the
//! bootstrap script, the cluster API, the CI system).
//!
//! # Modules
//!
//! - [`gitops`] - Application snapshots, classification, and the convergence monitor
//! - [`install`] - Installation orchestration (clone, bootstrap, converge, seed secrets)
//! - [`ci`] - CI job context, PR pairing, and the result webhook
//! - [`suite`] - E2E suite runner launching
//! - [`config`] - Environment-derived configuration helpers
//! - [`retry`] - Bounded retry for orchestration steps
//! - [`error`] - Error types for the harness

#![deny(missing_docs)]

pub mod ci;
pub mod config;
pub mod error;
pub mod gitops;
pub mod install;
pub mod retry;
pub mod suite;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// Defaults shared between the CLI arguments and InstallConfig::from_env so
// both entry points agree on timing and placement.

/// Default namespace holding the GitOps Application resources
pub const DEFAULT_GITOPS_NAMESPACE: &str = "openshift-gitops";

/// Default pause between convergence polls, in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Default maximum wall-clock wait for application convergence, in seconds
pub const DEFAULT_CONVERGE_DEADLINE_SECS: u64 = 1800;
