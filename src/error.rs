//! Error taxonomy for orchestration runs.
//!
//! Most variants are fatal: the dispatcher aborts the run and exits
//! non-zero.  [`DeployError::PublishFailed`] is the exception; it is
//! recorded and surfaced once the remaining steps have finished.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("cluster initialization failed: {0}")]
    ClusterInit(String),

    #[error("required file missing: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image build failed for {image}: {reason}")]
    ImageBuild { image: String, reason: String },

    #[error("registry login to {registry} failed: {reason}")]
    RegistryLogin { registry: String, reason: String },

    #[error("failed to publish images: {}", .0.join(", "))]
    PublishFailed(Vec<String>),

    #[error("invalid stack manifest {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },

    #[error("stack submission failed: {0}")]
    StackSubmit(String),

    #[error("deploy timed out: stack {stack} did not converge within {waited:?}")]
    DeployTimedOut { stack: String, waited: Duration },

    #[error("stack {stack} was not removed within {waited:?}")]
    RemoveTimedOut { stack: String, waited: Duration },

    #[error("deployment lease for {stack} is held by {holder} since {since}")]
    LeaseHeld {
        stack: String,
        holder: String,
        since: String,
    },

    #[error(transparent)]
    Runtime(#[from] anyhow::Error),
}

impl DeployError {
    /// Failures that should not stop the remaining steps of a run.
    pub fn is_deferred(&self) -> bool {
        matches!(self, DeployError::PublishFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_publish_failures_are_deferred() {
        assert!(DeployError::PublishFailed(vec!["a/b:latest".into()]).is_deferred());
        assert!(!DeployError::StackSubmit("boom".into()).is_deferred());
        assert!(!DeployError::ImageBuild {
            image: "api".into(),
            reason: "exit 1".into()
        }
        .is_deferred());
    }

    #[test]
    fn publish_failure_lists_references() {
        let err = DeployError::PublishFailed(vec!["r/u/a:latest".into(), "r/u/b:latest".into()]);
        assert_eq!(
            err.to_string(),
            "failed to publish images: r/u/a:latest, r/u/b:latest"
        );
    }
}
