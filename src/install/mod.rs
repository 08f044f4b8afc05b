//! Platform installation orchestration.
//!
//! Drives the provisioning flow for the GitOps-managed platform on a target
//! cluster:
//!
//! 1. Preflight checks (required tools, required credential env vars)
//! 2. Clone the manifest repository and register the testing fork remote
//! 3. Run the platform bootstrap script with the seeded environment
//! 4. Wait for all GitOps applications to converge
//! 5. Seed the registry pull secret consumed by the test suites
//!
//! The convergence wait is the gate: nothing after it runs until every
//! application reports Synced and Healthy, and a timeout fails the
//! installation with the names of the applications that never got there.

pub mod secrets;

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use kube::Client;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{env_or, env_required, random_branch_id};
use crate::gitops::monitor::{ConvergeError, ConvergenceMonitor, MonitorConfig};
use crate::gitops::source::GitopsApplications;
use crate::retry::retry_fixed;

/// Tools that must be on PATH before installation starts
const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("git", "Install git: https://git-scm.com/downloads"),
    ("kubectl", "Install kubectl: https://kubernetes.io/docs/tasks/tools/"),
    ("oc", "Install oc: https://docs.openshift.com/container-platform/latest/cli_reference/openshift_cli/getting-started-cli.html"),
    ("jq", "Install jq: https://jqlang.github.io/jq/download/"),
    ("yq", "Install yq: https://github.com/mikefarah/yq#install"),
];

/// Configuration for one installation run
///
/// Everything the run needs is captured here up front - job metadata, fork
/// coordinates, namespaces, timing - so no step reads process-global state
/// mid-flight.
#[derive(Clone, Debug)]
pub struct InstallConfig {
    /// Scratch directory for clones and metadata
    pub tmp_dir: PathBuf,
    /// Where the manifest repository is cloned
    pub clone_dir: PathBuf,
    /// Organization owning the manifest repository
    pub manifest_org: String,
    /// Manifest repository name
    pub manifest_repo: String,
    /// Branch of the manifest repository to install from
    pub manifest_branch: String,
    /// Organization holding the testing fork of the manifest repository
    pub fork_org: String,
    /// Name of the git remote registered for the fork
    pub fork_remote: String,
    /// Namespace where test applications are created by the suites
    pub applications_namespace: String,
    /// Namespace holding the GitOps Application resources
    pub gitops_namespace: String,
    /// Arguments passed to the bootstrap script
    pub bootstrap_args: Vec<String>,
    /// Total bootstrap attempts before giving up
    pub bootstrap_attempts: u32,
    /// Base64-encoded dockerconfigjson for the image registry, if configured
    pub registry_token: Option<String>,
    /// Namespace for the seeded registry pull secret
    pub registry_secret_namespace: String,
    /// Name of the seeded registry pull secret
    pub registry_secret_name: String,
    /// Pause between convergence polls
    pub poll_interval: Duration,
    /// Maximum wall-clock wait for application convergence
    pub deadline: Duration,
    /// Extra env vars for the bootstrap script (component PR images, etc.)
    pub extra_env: Vec<(String, String)>,
}

impl InstallConfig {
    /// Build the config from env vars, with the documented defaults
    pub fn from_env() -> Self {
        let tmp_dir = PathBuf::from(env_or("GANTRY_TMP_DIR", "tmp"));
        let manifest_repo = env_or("MANIFESTS_REPO", "platform-manifests");
        let clone_dir = tmp_dir.join(&manifest_repo);

        Self {
            tmp_dir,
            clone_dir,
            manifest_org: env_or("MANIFESTS_ORG", "example-platform"),
            manifest_repo,
            manifest_branch: env_or("MANIFESTS_BRANCH", "main"),
            fork_org: env_or("FORK_ORG", "example-platform-qe"),
            fork_remote: env_or("FORK_REMOTE", "qe"),
            applications_namespace: env_or("E2E_APPLICATIONS_NAMESPACE", "platform-e2e-test"),
            gitops_namespace: env_or("GITOPS_NAMESPACE", crate::DEFAULT_GITOPS_NAMESPACE),
            bootstrap_args: vec!["preview".to_string()],
            bootstrap_attempts: 2,
            registry_token: std::env::var("REGISTRY_TOKEN").ok().filter(|t| !t.is_empty()),
            registry_secret_namespace: env_or("REGISTRY_SECRET_NAMESPACE", "e2e-secrets"),
            registry_secret_name: env_or("REGISTRY_SECRET_NAME", "registry-pull-secret"),
            poll_interval: Duration::from_secs(crate::DEFAULT_POLL_INTERVAL_SECS),
            deadline: Duration::from_secs(crate::DEFAULT_CONVERGE_DEADLINE_SECS),
            extra_env: Vec::new(),
        }
    }

    /// URL of the upstream manifest repository
    pub fn manifest_url(&self) -> String {
        format!("https://github.com/{}/{}", self.manifest_org, self.manifest_repo)
    }

    /// URL of the testing fork of the manifest repository
    pub fn fork_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.fork_org, self.manifest_repo)
    }
}

/// Errors that can occur during installation
#[derive(Debug, Error)]
pub enum InstallError {
    /// A prerequisite tool is missing
    #[error("prerequisite not found: {tool} - {hint}")]
    PrerequisiteNotFound {
        /// The tool that was not found
        tool: String,
        /// Hint for how to install it
        hint: String,
    },

    /// Applications did not converge
    #[error("applications failed to converge: {0}")]
    Converge(#[from] ConvergeError),

    /// Any other harness error (git, command, kubernetes, config)
    #[error(transparent)]
    Harness(#[from] crate::Error),
}

/// The installation orchestrator
#[derive(Debug)]
pub struct Installer {
    config: InstallConfig,
}

impl Installer {
    /// Create an installer with the given configuration
    pub fn new(config: InstallConfig) -> Self {
        Self { config }
    }

    /// Run the installation
    pub async fn run(&self, client: &Client, cancel: &CancellationToken) -> Result<(), InstallError> {
        println!("=== Checking prerequisites ===\n");
        self.check_prerequisites().await?;

        println!("\n=== Cloning manifest repository ===\n");
        self.clone_manifests().await?;

        println!("\n=== Bootstrapping platform ===\n");
        self.run_bootstrap().await?;

        println!("\n=== Waiting for application convergence ===\n");
        self.wait_for_applications(client, cancel).await?;

        if let Some(token) = &self.config.registry_token {
            println!("\n=== Seeding registry pull secret ===\n");
            secrets::ensure_registry_secret(
                client,
                &self.config.registry_secret_namespace,
                &self.config.registry_secret_name,
                token,
            )
            .await?;
        } else {
            warn!("REGISTRY_TOKEN not set, skipping registry pull secret");
        }

        println!("\n=== Installation complete ===");
        Ok(())
    }

    /// Check that required tools and credentials are present.
    ///
    /// Runs before anything touches the cluster so a missing binary or secret
    /// fails in seconds, not after a half-finished bootstrap.
    pub async fn check_prerequisites(&self) -> Result<(), InstallError> {
        env_required("GITHUB_TOKEN").map_err(InstallError::Harness)?;
        env_required("REGISTRY_TOKEN").map_err(InstallError::Harness)?;

        for (tool, hint) in REQUIRED_TOOLS {
            print!("  Checking {}... ", tool);
            if self.check_tool(tool).await? {
                println!("OK");
            } else {
                println!("NOT FOUND");
                return Err(InstallError::PrerequisiteNotFound {
                    tool: tool.to_string(),
                    hint: hint.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Check if a tool is available on PATH
    async fn check_tool(&self, tool: &str) -> Result<bool, crate::Error> {
        let result = Command::new("which").arg(tool).output().await?;
        Ok(result.status.success())
    }

    /// Clone the manifest repository and register the fork remote.
    ///
    /// A stale clone from a previous run is removed first; the bootstrap
    /// script pushes per-run branches to the fork remote.
    pub async fn clone_manifests(&self) -> Result<(), crate::Error> {
        let clone_dir = &self.config.clone_dir;

        if tokio::fs::metadata(clone_dir).await.is_ok() {
            warn!(dir = %clone_dir.display(), "Clone directory already exists, removing");
            tokio::fs::remove_dir_all(clone_dir).await?;
        }
        tokio::fs::create_dir_all(&self.config.tmp_dir).await?;

        let url = self.config.manifest_url();
        info!(url = %url, branch = %self.config.manifest_branch, "Cloning manifest repository");

        self.run_git(&[
            "clone",
            "--branch",
            &self.config.manifest_branch,
            &url,
            &clone_dir.display().to_string(),
        ])
        .await?;

        self.run_git(&[
            "-C",
            &clone_dir.display().to_string(),
            "remote",
            "add",
            &self.config.fork_remote,
            &self.config.fork_url(),
        ])
        .await?;

        Ok(())
    }

    /// Run a git command, mapping failures to git errors
    async fn run_git(&self, args: &[&str]) -> Result<(), crate::Error> {
        let output = Command::new("git").args(args).output().await?;
        if !output.status.success() {
            return Err(crate::Error::git(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Env vars handed to the bootstrap script.
    ///
    /// The script's contract: fork coordinates, the applications namespace, a
    /// per-run branch id, registry credentials, plus whatever the CI context
    /// seeded for component PR images.
    fn bootstrap_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("GITOPS_FORK_ORG".to_string(), self.config.fork_org.clone()),
            ("GITOPS_FORK_REMOTE".to_string(), self.config.fork_remote.clone()),
            (
                "E2E_APPLICATIONS_NAMESPACE".to_string(),
                self.config.applications_namespace.clone(),
            ),
            ("TEST_BRANCH_ID".to_string(), random_branch_id(4)),
        ];
        if let Some(token) = &self.config.registry_token {
            env.push(("REGISTRY_TOKEN".to_string(), token.clone()));
        }
        env.extend(self.config.extra_env.iter().cloned());
        env
    }

    /// Run the bootstrap script in the clone dir, streaming its output.
    ///
    /// The script is long-running and occasionally trips over infrastructure
    /// hiccups, so it is retried with a pause.
    pub async fn run_bootstrap(&self) -> Result<(), crate::Error> {
        let attempts = self.config.bootstrap_attempts;
        retry_fixed(attempts, Duration::from_secs(10), "bootstrap-cluster", || {
            self.bootstrap_once()
        })
        .await
    }

    async fn bootstrap_once(&self) -> Result<(), crate::Error> {
        let script = "hack/bootstrap-cluster.sh";
        let args = &self.config.bootstrap_args;

        info!(script = %script, args = ?args, "Running bootstrap script");

        let mut child = Command::new(script)
            .args(args)
            .current_dir(&self.config.clone_dir)
            .envs(self.bootstrap_env())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| crate::Error::command(script, e.to_string()))?;

        if let Some(stdout) = child.stdout.take() {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            while let Some(line) = lines.next_line().await? {
                println!("    {}", line);
            }
        }

        let stderr_handle = child.stderr.take();
        let status = child.wait().await?;
        if !status.success() {
            let stderr_msg = if let Some(stderr) = stderr_handle {
                let reader = BufReader::new(stderr);
                let mut lines = reader.lines();
                let mut stderr_output = Vec::new();
                while let Some(line) = lines.next_line().await.ok().flatten() {
                    stderr_output.push(line);
                }
                stderr_output.join("\n")
            } else {
                "bootstrap script failed".to_string()
            };

            return Err(crate::Error::command(script, stderr_msg));
        }

        Ok(())
    }

    /// Wait for every GitOps application to report Synced and Healthy
    async fn wait_for_applications(
        &self,
        client: &Client,
        cancel: &CancellationToken,
    ) -> Result<(), InstallError> {
        let adapter = GitopsApplications::new(client.clone());
        let monitor_config = MonitorConfig::new(
            self.config.gitops_namespace.clone(),
            self.config.poll_interval,
            self.config.deadline,
        )
        .map_err(InstallError::Harness)?;

        let mut monitor = ConvergenceMonitor::new(adapter.clone(), adapter, monitor_config);
        let convergence = monitor.wait_for_convergence(cancel).await?;

        info!(ticks = convergence.ticks, "Applications converged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> InstallConfig {
        InstallConfig {
            tmp_dir: PathBuf::from("tmp"),
            clone_dir: PathBuf::from("tmp/platform-manifests"),
            manifest_org: "example-platform".to_string(),
            manifest_repo: "platform-manifests".to_string(),
            manifest_branch: "main".to_string(),
            fork_org: "example-platform-qe".to_string(),
            fork_remote: "qe".to_string(),
            applications_namespace: "platform-e2e-test".to_string(),
            gitops_namespace: "openshift-gitops".to_string(),
            bootstrap_args: vec!["preview".to_string()],
            bootstrap_attempts: 2,
            registry_token: None,
            registry_secret_namespace: "e2e-secrets".to_string(),
            registry_secret_name: "registry-pull-secret".to_string(),
            poll_interval: Duration::from_secs(10),
            deadline: Duration::from_secs(1800),
            extra_env: Vec::new(),
        }
    }

    #[test]
    fn manifest_and_fork_urls_are_derived_from_coordinates() {
        let config = sample_config();
        assert_eq!(
            config.manifest_url(),
            "https://github.com/example-platform/platform-manifests"
        );
        assert_eq!(
            config.fork_url(),
            "https://github.com/example-platform-qe/platform-manifests.git"
        );
    }

    #[test]
    fn bootstrap_env_carries_fork_coordinates_and_branch_id() {
        let installer = Installer::new(sample_config());
        let env = installer.bootstrap_env();

        let get = |k: &str| env.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("GITOPS_FORK_ORG"), Some("example-platform-qe"));
        assert_eq!(get("GITOPS_FORK_REMOTE"), Some("qe"));
        assert_eq!(get("E2E_APPLICATIONS_NAMESPACE"), Some("platform-e2e-test"));
        assert_eq!(get("TEST_BRANCH_ID").map(str::len), Some(4));
        // No registry token configured, none passed through.
        assert_eq!(get("REGISTRY_TOKEN"), None);
    }

    #[test]
    fn bootstrap_env_includes_component_extras() {
        let mut config = sample_config();
        config.extra_env.push((
            "BUILD_SERVICE_PR_SHA".to_string(),
            "abc123".to_string(),
        ));
        let installer = Installer::new(config);
        let env = installer.bootstrap_env();
        assert!(env.contains(&("BUILD_SERVICE_PR_SHA".to_string(), "abc123".to_string())));
    }
}
