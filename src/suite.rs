//! E2E suite launching.
//!
//! The test-case bodies live in an external suite runner; this module only
//! starts it with the right knobs (label filter, artifact dir, report path)
//! and a hard wall-clock timeout, and surfaces its exit status. Suite output
//! streams straight through to the CI log.

use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;
use tracing::info;

use crate::config::env_or;
use crate::Error;

/// Configuration for one suite run
#[derive(Clone, Debug)]
pub struct SuiteConfig {
    /// Suite runner command to execute
    pub command: String,
    /// Label filter selecting which suites run; empty runs everything
    pub label_filter: String,
    /// Directory for reports and artifacts
    pub artifact_dir: PathBuf,
    /// File name of the JUnit report written into the artifact dir
    pub report_name: String,
    /// Hard wall-clock timeout for the whole run
    pub timeout: Duration,
}

impl SuiteConfig {
    /// Build the config from env vars, with the documented defaults
    pub fn from_env() -> Self {
        Self {
            command: env_or("E2E_SUITE_COMMAND", "scripts/run-suites.sh"),
            label_filter: env_or("E2E_TEST_SUITE_LABEL", ""),
            artifact_dir: PathBuf::from(env_or("ARTIFACT_DIR", ".")),
            report_name: "e2e-report.xml".to_string(),
            timeout: Duration::from_secs(90 * 60),
        }
    }
}

/// Run the e2e suite runner and wait for it to finish.
///
/// The runner inherits stdio so suite progress lands in the CI log as it
/// happens. A run that outlives the timeout is killed and reported as a
/// command failure; a non-zero exit is a command failure carrying the status.
pub async fn run_suite(config: &SuiteConfig) -> Result<(), Error> {
    info!(
        command = %config.command,
        label_filter = %config.label_filter,
        artifact_dir = %config.artifact_dir.display(),
        "Launching e2e suites"
    );

    let mut child = Command::new(&config.command)
        .arg(format!("--label-filter={}", config.label_filter))
        .arg(format!("--output-dir={}", config.artifact_dir.display()))
        .arg(format!("--junit-report={}", config.report_name))
        .spawn()
        .map_err(|e| Error::command(&config.command, e.to_string()))?;

    let status = match tokio::time::timeout(config.timeout, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            child.kill().await?;
            return Err(Error::command(
                &config.command,
                format!("suite run exceeded timeout of {:?}", config.timeout),
            ));
        }
    };

    if !status.success() {
        return Err(Error::command(
            &config.command,
            format!("suites failed with {status}"),
        ));
    }

    info!("All e2e suites passed");
    Ok(())
}
