//! Error types for the gantry harness

use thiserror::Error;

/// Main error type for gantry operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Configuration error (missing env var, malformed job spec, bad interval)
    #[error("configuration error: {0}")]
    Config(String),

    /// An external command failed to execute or exited non-zero
    #[error("command failed: {command} - {message}")]
    Command {
        /// The command that failed
        command: String,
        /// Error message or captured stderr
        message: String,
    },

    /// Git operation error (clone, remote, checkout)
    #[error("git error: {0}")]
    Git(String),

    /// HTTP request error (GitHub lookup, webhook relay)
    #[error("http error: {0}")]
    Http(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a command error for the given command
    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a git error with the given message
    pub fn git(msg: impl Into<String>) -> Self {
        Self::Git(msg.into())
    }

    /// Create an HTTP error with the given message
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Propagation Through the Installation Pipeline
    // ==========================================================================
    //
    // Each error category maps to a different stage of the pipeline and a
    // different recovery strategy: configuration errors fail fast before any
    // loop starts, command/git errors abort the orchestration step, and
    // kubernetes errors inside the convergence loop are absorbed per tick.

    /// Story: missing credentials are caught before anything runs
    ///
    /// Preflight checks surface missing secrets as configuration errors with
    /// the env var name in the message, so the operator knows what to export.
    #[test]
    fn story_missing_credentials_fail_preflight() {
        let err = Error::config("required env var GITHUB_TOKEN is not set or empty");
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("GITHUB_TOKEN"));

        match Error::config("any message") {
            Error::Config(msg) => assert_eq!(msg, "any message"),
            _ => panic!("Expected Config variant"),
        }
    }

    /// Story: a failed bootstrap script surfaces the command and its stderr
    #[test]
    fn story_bootstrap_failure_carries_command_context() {
        let err = Error::command(
            "hack/bootstrap-cluster.sh",
            "error: unable to reach cluster API",
        );
        assert!(err.to_string().contains("hack/bootstrap-cluster.sh"));
        assert!(err.to_string().contains("unable to reach cluster API"));
    }

    /// Story: git failures identify the clone/remote operation that broke
    #[test]
    fn story_git_errors_identify_the_operation() {
        let err = Error::git("clone of https://github.com/example/manifests failed: exit code 128");
        assert!(err.to_string().contains("git error"));
        assert!(err.to_string().contains("exit code 128"));
    }

    /// Story: error constructors accept both String and &str
    #[test]
    fn story_error_construction_ergonomics() {
        let repo = "infra-manifests";
        let err = Error::git(format!("remote for {repo} already exists"));
        assert!(err.to_string().contains("infra-manifests"));

        let err = Error::http("webhook relay returned 503");
        assert!(err.to_string().contains("503"));
    }
}
