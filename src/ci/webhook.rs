//! Result webhook for CI runs.
//!
//! After a run finishes, a small JSON report is posted to a relay endpoint so
//! downstream tooling (dashboards, retest bots) can react. The body is signed
//! with HMAC-SHA256 over a shared salt so the relay can reject spoofed posts.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::info;

use crate::ci::{JobContext, JobType};
use crate::Error;

type HmacSha256 = Hmac<Sha256>;

/// Signature header attached to the webhook post
pub const SIGNATURE_HEADER: &str = "X-Gantry-Signature-256";

/// Repository identification in the report payload
#[derive(Clone, Debug, Serialize)]
pub struct ReportRepository {
    /// `org/repo` of the repository the run tested
    pub full_name: String,
    /// PR number, or `"periodic"` for scheduled runs
    pub pull_number: String,
}

/// Report payload posted to the relay
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    /// Path of the reporting executable
    pub path: String,
    /// Repository under test
    pub repository: ReportRepository,
    /// Browser link to the repository
    pub repository_url: String,
}

impl Report {
    /// Build the report for this job, if the job kind is reportable.
    ///
    /// Periodic runs report against the manifest repository; presubmit runs
    /// against the PR's repository. Anything else has no audience and returns
    /// None.
    pub fn for_job(ctx: &JobContext, manifest_org: &str, manifest_repo: &str) -> Option<Self> {
        let path = std::env::current_exe()
            .ok()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        match (&ctx.job_type, &ctx.pr) {
            (JobType::Periodic, _) => Some(Self {
                path,
                repository: ReportRepository {
                    full_name: format!("{manifest_org}/{manifest_repo}"),
                    pull_number: "periodic".to_string(),
                },
                repository_url: format!("https://github.com/{manifest_org}/{manifest_repo}"),
            }),
            (_, Some(pr)) => Some(Self {
                path,
                repository: ReportRepository {
                    full_name: format!("{}/{}", pr.organization, pr.repo_name),
                    pull_number: pr.number.to_string(),
                },
                repository_url: pr.repo_link.clone(),
            }),
            _ => None,
        }
    }

    /// Serialize the payload and compute its base64 HMAC-SHA256 signature
    pub fn sign(&self, salt: &str) -> Result<(Vec<u8>, String), Error> {
        let body = serde_json::to_vec(self)?;
        let mut mac = HmacSha256::new_from_slice(salt.as_bytes())
            .map_err(|e| Error::config(format!("invalid webhook salt: {e}")))?;
        mac.update(&body);
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        Ok((body, signature))
    }

    /// Sign and post the report to the relay
    pub async fn send(&self, salt: &str, target_url: &str) -> Result<(), Error> {
        let (body, signature) = self.sign(salt)?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("gantry/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let response = client
            .post(target_url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, &signature)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::http(format!(
                "webhook relay {target_url} returned {status}"
            )));
        }

        info!(target = %target_url, status = %status, "Webhook report sent");
        Ok(())
    }
}
