//! Gantry - e2e provisioning and convergence harness CLI

use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gantry::ci::webhook::Report;
use gantry::ci::{component_env, GithubLookup, JobContext};
use gantry::gitops::monitor::{ConvergenceMonitor, MonitorConfig};
use gantry::gitops::source::GitopsApplications;
use gantry::install::{InstallConfig, Installer};
use gantry::suite::{run_suite, SuiteConfig};

/// Gantry - provisioning and convergence harness for GitOps-managed platforms
#[derive(Parser, Debug)]
#[command(name = "gantry", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install the platform: clone manifests, bootstrap, wait for convergence
    ///
    /// The full CI flow: preflight checks, manifest clone with the testing
    /// fork remote, bootstrap script with the seeded environment, convergence
    /// wait, and registry secret seeding.
    Install(InstallArgs),

    /// Wait for GitOps applications to converge, nothing else
    ///
    /// Useful on a cluster that is already bootstrapped, e.g. re-checking
    /// after a manual fix or from a different CI stage.
    Converge(ConvergeArgs),

    /// Run the e2e suites and report the result to the webhook relay
    ///
    /// Mirrors the CI flow after installation: launch the external suite
    /// runner, then send the result webhook whether the suites passed or
    /// not, then propagate the suite status.
    Test(TestArgs),

    /// Send the CI result webhook to the configured relay
    Report(ReportArgs),
}

/// Install mode arguments
#[derive(Parser, Debug)]
struct InstallArgs {
    /// Namespace holding the GitOps Application resources
    #[arg(long, env = "GITOPS_NAMESPACE", default_value = gantry::DEFAULT_GITOPS_NAMESPACE)]
    gitops_namespace: String,

    /// Seconds between convergence polls
    #[arg(long, default_value_t = gantry::DEFAULT_POLL_INTERVAL_SECS)]
    poll_interval_secs: u64,

    /// Maximum seconds to wait for application convergence
    #[arg(long, default_value_t = gantry::DEFAULT_CONVERGE_DEADLINE_SECS)]
    deadline_secs: u64,
}

/// Converge mode arguments
#[derive(Parser, Debug)]
struct ConvergeArgs {
    /// Namespace holding the GitOps Application resources
    #[arg(long, env = "GITOPS_NAMESPACE", default_value = gantry::DEFAULT_GITOPS_NAMESPACE)]
    namespace: String,

    /// Seconds between convergence polls
    #[arg(long, default_value_t = gantry::DEFAULT_POLL_INTERVAL_SECS)]
    poll_interval_secs: u64,

    /// Maximum seconds to wait for application convergence
    #[arg(long, default_value_t = gantry::DEFAULT_CONVERGE_DEADLINE_SECS)]
    deadline_secs: u64,

    /// Substring in condition messages that marks a stalled reconciliation
    #[arg(long, default_value = gantry::gitops::application::DEFAULT_STALL_SIGNATURE)]
    stall_signature: String,

    /// Fail after this many consecutive failed status fetches (0 = deadline only)
    #[arg(long, default_value_t = 0)]
    fetch_failure_cap: u32,
}

/// Test mode arguments
#[derive(Parser, Debug)]
struct TestArgs {
    /// Shared salt used to sign the webhook payload
    #[arg(long, env = "WEBHOOK_SALT_SECRET", default_value = "123456789")]
    salt_secret: String,

    /// Relay URL to post the report to; unset skips reporting
    #[arg(long, env = "WEBHOOK_TARGET_URL")]
    target_url: Option<String>,

    /// Organization owning the manifest repository (periodic job reports)
    #[arg(long, env = "MANIFESTS_ORG", default_value = "example-platform")]
    manifest_org: String,

    /// Manifest repository name (periodic job reports)
    #[arg(long, env = "MANIFESTS_REPO", default_value = "platform-manifests")]
    manifest_repo: String,
}

/// Report mode arguments
#[derive(Parser, Debug)]
struct ReportArgs {
    /// Shared salt used to sign the webhook payload
    #[arg(long, env = "WEBHOOK_SALT_SECRET")]
    salt_secret: String,

    /// Relay URL to post the report to
    #[arg(long, env = "WEBHOOK_TARGET_URL")]
    target_url: String,

    /// Organization owning the manifest repository (periodic job reports)
    #[arg(long, env = "MANIFESTS_ORG", default_value = "example-platform")]
    manifest_org: String,

    /// Manifest repository name (periodic job reports)
    #[arg(long, env = "MANIFESTS_REPO", default_value = "platform-manifests")]
    manifest_repo: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // One token for the whole run; Ctrl-C cancels the current wait and the
    // monitor returns within one poll interval.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            signal_cancel.cancel();
        }
    });

    match cli.command {
        Commands::Install(args) => run_install(args, &cancel).await,
        Commands::Converge(args) => run_converge(args, &cancel).await,
        Commands::Test(args) => run_test(args).await,
        Commands::Report(args) => run_report(args).await,
    }
}

/// Run the full installation flow
async fn run_install(args: InstallArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    let mut config = InstallConfig::from_env();
    config.gitops_namespace = args.gitops_namespace;
    config.poll_interval = Duration::from_secs(args.poll_interval_secs);
    config.deadline = Duration::from_secs(args.deadline_secs);

    // Component PRs deploy their own image; resolve the PR branch so pairing
    // can point the manifest clone at the author's fork branch where one
    // exists.
    let mut ctx = JobContext::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    if let Some(pr) = ctx.pr.as_mut() {
        let lookup = GithubLookup::new().map_err(|e| anyhow::anyhow!("{e}"))?;
        match lookup
            .pr_branch(&pr.organization, &pr.repo_name, pr.number)
            .await
        {
            Ok(branch) => pr.branch_name = Some(branch),
            Err(e) => tracing::warn!(error = %e, "Cannot resolve PR branch, continuing without"),
        }

        if pr.repo_name == config.manifest_repo {
            // The manifest repository itself is under test: install from the
            // PR's org and branch.
            config.manifest_org = pr.organization.clone();
            if let Some(branch) = &pr.branch_name {
                config.manifest_branch = branch.clone();
            }
        } else if lookup.pairing_required(pr, &config.manifest_repo).await {
            // A component PR may carry a paired branch in the author's
            // manifest fork; install from it when present.
            config.manifest_org = pr.author.clone();
            if let Some(branch) = &pr.branch_name {
                config.manifest_branch = branch.clone();
            }
        }
    }
    config.extra_env = component_env(&ctx, &config.manifest_repo);

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {e}"))?;

    let installer = Installer::new(config);
    installer
        .run(&client, cancel)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))
}

/// Run only the convergence wait
async fn run_converge(args: ConvergeArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    let config = MonitorConfig::new(
        args.namespace,
        Duration::from_secs(args.poll_interval_secs),
        Duration::from_secs(args.deadline_secs),
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?
    .with_stall_signature(args.stall_signature)
    .with_fetch_failure_cap(args.fetch_failure_cap);

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {e}"))?;

    let adapter = GitopsApplications::new(client);
    let mut monitor = ConvergenceMonitor::new(adapter.clone(), adapter, config);

    let convergence = monitor
        .wait_for_convergence(cancel)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    println!(
        "All applications are synced and healthy after {} ticks",
        convergence.ticks
    );
    Ok(())
}

/// Run the e2e suites, then report, then propagate the suite status
async fn run_test(args: TestArgs) -> anyhow::Result<()> {
    let ctx = JobContext::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let suite_config = SuiteConfig::from_env();
    let suite_result = run_suite(&suite_config).await;

    // The webhook goes out regardless of the suite outcome; a relay error is
    // logged but never masks the suite result.
    if let Some(target_url) = &args.target_url {
        match Report::for_job(&ctx, &args.manifest_org, &args.manifest_repo) {
            Some(report) => {
                if let Err(e) = report.send(&args.salt_secret, target_url).await {
                    tracing::warn!(error = %e, "Failed to send result webhook");
                }
            }
            None => tracing::info!(
                job_type = %ctx.job_type,
                "Job is not reportable, skipping webhook"
            ),
        }
    }

    suite_result.map_err(|e| anyhow::anyhow!("{e}"))
}

/// Send the CI result webhook
async fn run_report(args: ReportArgs) -> anyhow::Result<()> {
    let ctx = JobContext::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let Some(report) = Report::for_job(&ctx, &args.manifest_org, &args.manifest_repo) else {
        println!(
            "Job type {} with no PR context is not reportable, skipping webhook",
            ctx.job_type
        );
        return Ok(());
    };

    report
        .send(&args.salt_secret, &args.target_url)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))
}
