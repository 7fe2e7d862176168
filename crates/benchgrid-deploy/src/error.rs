//! Deployment error types.

use std::time::Duration;

use bench_core::Target;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    /// The backend has no record of the resource.
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("no deployment backend registered for target {0}")]
    UnsupportedTarget(Target),

    #[error("resource {resource} of deployment {deployment} is degraded")]
    Degraded { deployment: String, resource: String },

    #[error("deployments not ready after {waited:?}")]
    Timeout { waited: Duration },

    #[error("wait cancelled: {0}")]
    Cancelled(String),

    #[error("readiness poll task failed: {0}")]
    Join(String),
}

pub type DeployResult<T> = Result<T, DeployError>;

impl DeployError {
    /// A backend failure worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeployError::Backend(_) | DeployError::Timeout { .. })
    }
}
