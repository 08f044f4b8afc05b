//! Environment-derived configuration helpers.
//!
//! CI hands everything to this tool through env vars. These helpers keep the
//! lookups in one place so every default is visible here rather than scattered
//! through the orchestration code. Job/PR metadata is parsed once into explicit
//! structs (see [`crate::ci`]) instead of being read ad hoc mid-run.

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::Error;

/// Read an env var, falling back to a default when unset or empty.
pub fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

/// Read an env var that must be present and non-empty.
///
/// Used for credentials checked during preflight; the error names the var so
/// the operator knows what to export.
pub fn env_required(key: &str) -> Result<String, Error> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::config(format!(
            "required env var {key} is not set or empty"
        ))),
    }
}

/// Generate a short random lowercase identifier for test branches.
///
/// The bootstrap script uses this to isolate per-run GitOps branches from one
/// another when several CI jobs run against forks concurrently.
pub fn random_branch_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}
