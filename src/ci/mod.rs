//! CI job context and pull-request pairing.
//!
//! CI hands this tool a job spec blob plus a handful of env vars. Everything
//! is parsed once, up front, into an explicit [`JobContext`] that the rest of
//! the pipeline receives as a value - no process-global job state, and any
//! malformed spec fails the run before a cluster is touched.

pub mod webhook;

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::env_or;
use crate::Error;

/// Env var carrying the CI job spec JSON
pub const JOB_SPEC_ENV: &str = "JOB_SPEC";

/// Kind of CI job this run executes under
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JobType {
    /// Scheduled run against the default branch; carries no PR context
    Periodic,
    /// Run for an open pull request
    #[default]
    Presubmit,
    /// Run after a merge
    Postsubmit,
}

impl JobType {
    /// Parse the CI-provided job type string
    pub fn parse(s: &str) -> Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "periodic" => Ok(Self::Periodic),
            "presubmit" => Ok(Self::Presubmit),
            "postsubmit" => Ok(Self::Postsubmit),
            other => Err(Error::config(format!(
                "invalid job type: {other}, expected one of: periodic, presubmit, postsubmit"
            ))),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Periodic => write!(f, "periodic"),
            Self::Presubmit => write!(f, "presubmit"),
            Self::Postsubmit => write!(f, "postsubmit"),
        }
    }
}

/// One pull ref inside the CI job spec
#[derive(Clone, Debug, Deserialize)]
pub struct Pull {
    /// PR author login
    pub author: String,
    /// Head commit SHA under test
    pub sha: String,
    /// PR number
    pub number: u64,
}

/// Repository refs inside the CI job spec
#[derive(Clone, Debug, Deserialize)]
pub struct Refs {
    /// Organization owning the tested repository
    #[serde(alias = "organization")]
    pub org: String,
    /// Tested repository name
    pub repo: String,
    /// Browser link to the tested repository
    #[serde(default)]
    pub repo_link: String,
    /// Pull requests under test (empty for postsubmit/periodic)
    #[serde(default)]
    pub pulls: Vec<Pull>,
}

/// CI job spec as handed over in the `JOB_SPEC` env var
#[derive(Clone, Debug, Deserialize)]
pub struct JobSpec {
    /// Repository refs; absent for some periodic jobs
    #[serde(default)]
    pub refs: Option<Refs>,
}

impl JobSpec {
    /// Parse the job spec from its JSON representation
    pub fn parse(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json)
            .map_err(|e| Error::config(format!("failed to parse {JOB_SPEC_ENV} JSON: {e}")))
    }
}

/// Pull-request metadata derived from the job spec
#[derive(Clone, Debug)]
pub struct PullRequestMetadata {
    /// PR author login
    pub author: String,
    /// Organization owning the tested repository
    pub organization: String,
    /// Tested repository name
    pub repo_name: String,
    /// Head commit SHA under test
    pub commit_sha: String,
    /// PR number
    pub number: u64,
    /// Browser link to the tested repository
    pub repo_link: String,
    /// Source branch of the PR, resolved lazily via the hosting API
    pub branch_name: Option<String>,
}

/// Everything the pipeline needs to know about the CI job it runs under
#[derive(Clone, Debug)]
pub struct JobContext {
    /// CI job name
    pub job_name: String,
    /// CI job type
    pub job_type: JobType,
    /// PR under test; None for periodic and rehearsal jobs
    pub pr: Option<PullRequestMetadata>,
}

impl JobContext {
    /// Build the context from `JOB_TYPE`, `JOB_NAME` and `JOB_SPEC`.
    ///
    /// Periodic and rehearsal jobs have no PR context and skip job spec
    /// parsing entirely; for everything else a malformed spec is a hard
    /// configuration error.
    pub fn from_env() -> Result<Self, Error> {
        let job_name = env_or("JOB_NAME", "");
        let job_type = JobType::parse(&env_or("JOB_TYPE", "presubmit"))?;

        let mut ctx = Self {
            job_name,
            job_type,
            pr: None,
        };

        if ctx.job_type == JobType::Periodic || ctx.is_rehearsal() {
            return Ok(ctx);
        }

        let spec_json = std::env::var(JOB_SPEC_ENV)
            .map_err(|_| Error::config(format!("{JOB_SPEC_ENV} env var is not set")))?;
        let spec = JobSpec::parse(&spec_json)?;

        let refs = spec
            .refs
            .ok_or_else(|| Error::config(format!("{JOB_SPEC_ENV} has no refs for a PR job")))?;
        let pull = refs
            .pulls
            .first()
            .ok_or_else(|| Error::config(format!("{JOB_SPEC_ENV} has no pulls for a PR job")))?;

        ctx.pr = Some(PullRequestMetadata {
            author: pull.author.clone(),
            organization: refs.org.clone(),
            repo_name: refs.repo.clone(),
            commit_sha: pull.sha.clone(),
            number: pull.number,
            repo_link: refs.repo_link.clone(),
            branch_name: None,
        });

        Ok(ctx)
    }

    /// Whether this is a CI config rehearsal run (no real PR under test)
    pub fn is_rehearsal(&self) -> bool {
        self.job_name.contains("rehearse")
    }
}

/// Env var pairs to seed for the bootstrap script, derived from which
/// repository the CI job is testing.
///
/// When a platform component's PR is under test, the bootstrap script deploys
/// that component from the PR image instead of the default branch; when the
/// manifest repository itself is under test, bootstrap pulls manifests from
/// the PR's org and branch.
pub fn component_env(ctx: &JobContext, manifest_repo: &str) -> Vec<(String, String)> {
    let mut vars = Vec::new();

    let Some(pr) = &ctx.pr else {
        return vars;
    };

    if pr.repo_name == manifest_repo {
        vars.push(("MANIFESTS_ORG".to_string(), pr.organization.clone()));
        if let Some(branch) = &pr.branch_name {
            vars.push(("MANIFESTS_BRANCH".to_string(), branch.clone()));
        }
        return vars;
    }

    // Component repos deploy the PR image; names follow the platform's
    // <component>-service convention.
    let Some((prefix, tag_suffix, suite_label)) = (match pr.repo_name.as_str() {
        "application-service" => Some(("APPLICATION_SERVICE", "application-service-image", "application")),
        "build-service" => Some(("BUILD_SERVICE", "build-service-image", "build")),
        "pipeline-service" => Some(("PIPELINE_SERVICE", "pipeline-service-image", "pipeline")),
        _ => None,
    }) else {
        return vars;
    };

    let component_image = env_or("COMPONENT_IMAGE", "");
    let image_repo = component_image
        .split('@')
        .next()
        .unwrap_or_default()
        .to_string();

    vars.push((format!("{prefix}_IMAGE_REPO"), image_repo));
    vars.push((format!("{prefix}_IMAGE_TAG"), format!("gantry-{tag_suffix}")));
    vars.push((format!("{prefix}_PR_OWNER"), pr.author.clone()));
    vars.push((format!("{prefix}_PR_SHA"), pr.commit_sha.clone()));
    vars.push(("E2E_TEST_SUITE_LABEL".to_string(), suite_label.to_string()));

    vars
}

// =============================================================================
// GitHub lookups
// =============================================================================
//
// Two single REST calls, not a client library: resolving a PR's head branch,
// and checking whether the PR author's fork of this harness carries a branch
// with the same name (PR pairing).

#[derive(Debug, Deserialize)]
struct BranchInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PrHead {
    head: PrHeadRef,
}

#[derive(Debug, Deserialize)]
struct PrHeadRef {
    #[serde(rename = "ref")]
    branch: String,
}

/// Minimal GitHub REST lookups used for PR pairing
#[derive(Clone)]
pub struct GithubLookup {
    http: reqwest::Client,
    api_base: String,
}

impl GithubLookup {
    /// Create a lookup against the public GitHub API
    pub fn new() -> Result<Self, Error> {
        Self::with_api_base("https://api.github.com")
    }

    /// Create a lookup against a custom API base URL (tests, GHE)
    pub fn with_api_base(api_base: impl Into<String>) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("gantry/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.into(),
        })
    }

    /// Resolve the head branch name of a pull request
    pub async fn pr_branch(&self, org: &str, repo: &str, number: u64) -> Result<String, Error> {
        let url = format!("{}/repos/{org}/{repo}/pulls/{number}", self.api_base);
        let pr: PrHead = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::http(format!("PR lookup {url} failed: {e}")))?
            .json()
            .await?;
        Ok(pr.head.branch)
    }

    /// Whether `owner/repo` has a branch with the given name
    pub async fn branch_exists(&self, owner: &str, repo: &str, branch: &str) -> Result<bool, Error> {
        let url = format!("{}/repos/{owner}/{repo}/branches", self.api_base);
        let branches: Vec<BranchInfo> = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::http(format!("branch listing {url} failed: {e}")))?
            .json()
            .await?;
        Ok(branches.iter().any(|b| b.name == branch))
    }

    /// Decide whether PR pairing applies for this job.
    ///
    /// Pairing means the PR author keeps a fork of `paired_repo` with a
    /// branch named like the component PR's branch; when present, the run
    /// uses that branch instead of the default one. Lookup failures degrade
    /// to "not required" so a hosting API hiccup never fails the run.
    pub async fn pairing_required(&self, pr: &PullRequestMetadata, paired_repo: &str) -> bool {
        let Some(branch) = &pr.branch_name else {
            return false;
        };
        match self.branch_exists(&pr.author, paired_repo, branch).await {
            Ok(found) => {
                if found {
                    info!(author = %pr.author, branch = %branch, "Found paired branch");
                }
                found
            }
            Err(e) => {
                warn!(
                    author = %pr.author,
                    error = %e,
                    "Cannot determine paired branches, using default branch"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presubmit_spec() -> &'static str {
        r#"{
            "type": "presubmit",
            "refs": {
                "org": "example-platform",
                "repo": "build-service",
                "repo_link": "https://github.com/example-platform/build-service",
                "pulls": [
                    { "author": "contributor", "sha": "abc123", "number": 42 }
                ]
            }
        }"#
    }

    // ==========================================================================
    // Story: Job Spec Parsing
    // ==========================================================================

    #[test]
    fn when_spec_is_valid_refs_and_pulls_are_extracted() {
        let spec = JobSpec::parse(presubmit_spec()).expect("valid spec");
        let refs = spec.refs.expect("has refs");
        assert_eq!(refs.org, "example-platform");
        assert_eq!(refs.repo, "build-service");
        assert_eq!(refs.pulls.len(), 1);
        assert_eq!(refs.pulls[0].author, "contributor");
        assert_eq!(refs.pulls[0].number, 42);
    }

    #[test]
    fn when_spec_uses_organization_alias_it_still_parses() {
        let spec = JobSpec::parse(
            r#"{"refs": {"organization": "example-platform", "repo": "e2e", "pulls": []}}"#,
        )
        .expect("valid spec");
        assert_eq!(spec.refs.expect("has refs").org, "example-platform");
    }

    #[test]
    fn when_spec_is_malformed_parse_fails_with_config_error() {
        let err = JobSpec::parse("{not json").unwrap_err();
        assert!(err.to_string().contains("JOB_SPEC"));
    }

    #[test]
    fn when_job_type_is_unknown_parse_fails() {
        let err = JobType::parse("nightly").unwrap_err();
        assert!(err.to_string().contains("nightly"));
    }

    // ==========================================================================
    // Story: Component Env Seeding
    // ==========================================================================

    fn ctx_for(repo: &str, branch: Option<&str>) -> JobContext {
        JobContext {
            job_name: "pull-ci-build-service-e2e".to_string(),
            job_type: JobType::Presubmit,
            pr: Some(PullRequestMetadata {
                author: "contributor".to_string(),
                organization: "example-platform".to_string(),
                repo_name: repo.to_string(),
                commit_sha: "abc123".to_string(),
                number: 42,
                repo_link: format!("https://github.com/example-platform/{repo}"),
                branch_name: branch.map(str::to_string),
            }),
        }
    }

    #[test]
    fn when_component_pr_is_tested_image_env_vars_are_seeded() {
        std::env::set_var("COMPONENT_IMAGE", "quay.io/example/build-service@sha256:deadbeef");
        let vars = component_env(&ctx_for("build-service", None), "platform-manifests");
        std::env::remove_var("COMPONENT_IMAGE");

        let get = |k: &str| {
            vars.iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("BUILD_SERVICE_IMAGE_REPO"), Some("quay.io/example/build-service"));
        assert_eq!(get("BUILD_SERVICE_IMAGE_TAG"), Some("gantry-build-service-image"));
        assert_eq!(get("BUILD_SERVICE_PR_OWNER"), Some("contributor"));
        assert_eq!(get("BUILD_SERVICE_PR_SHA"), Some("abc123"));
        assert_eq!(get("E2E_TEST_SUITE_LABEL"), Some("build"));
    }

    #[test]
    fn when_manifest_repo_pr_is_tested_org_and_branch_are_seeded() {
        let vars = component_env(
            &ctx_for("platform-manifests", Some("fix-pipelines")),
            "platform-manifests",
        );
        assert!(vars.contains(&("MANIFESTS_ORG".to_string(), "example-platform".to_string())));
        assert!(vars.contains(&("MANIFESTS_BRANCH".to_string(), "fix-pipelines".to_string())));
    }

    #[test]
    fn when_repo_is_not_a_known_component_no_vars_are_seeded() {
        let vars = component_env(&ctx_for("docs", None), "platform-manifests");
        assert!(vars.is_empty());
    }

    #[test]
    fn when_job_has_no_pr_no_vars_are_seeded() {
        let ctx = JobContext {
            job_name: "periodic-platform-e2e".to_string(),
            job_type: JobType::Periodic,
            pr: None,
        };
        assert!(component_env(&ctx, "platform-manifests").is_empty());
    }

    // ==========================================================================
    // Story: Rehearsal Detection
    // ==========================================================================

    #[test]
    fn rehearsal_jobs_are_detected_by_name() {
        let ctx = JobContext {
            job_name: "rehearse-12345-pull-ci-e2e".to_string(),
            job_type: JobType::Presubmit,
            pr: None,
        };
        assert!(ctx.is_rehearsal());
    }
}
