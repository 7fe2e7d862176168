//! Provisioning error types and their classification.

use std::fmt;

use benchgrid_deploy::DeployError;
use benchgrid_network::NetworkError;
use benchgrid_placement::PlacementError;
use benchgrid_state::StateError;
use thiserror::Error;

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("vm instance not found for vm template {0}")]
    VmNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Left reserved because the deployment using it may still exist.
    #[error("{0} kept reserved while the deployment may still exist")]
    Retained(String),

    /// A failed step plus every compensation that failed after it.
    #[error("{primary} (cleanup failed: {})", join(.cleanup))]
    Compensation {
        primary: Box<ProvisionError>,
        cleanup: Vec<ProvisionError>,
    },

    /// Teardown steps that still failed after their retries.
    #[error("teardown failed: {}", join(.0))]
    Teardown(Vec<ProvisionError>),
}

/// Caller-facing failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AllocationExhausted,
    QuotaUnavailable,
    ConfigurationInvalid,
    ExternalBackend,
    NotFound,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AllocationExhausted => "allocation_exhausted",
            ErrorKind::QuotaUnavailable => "quota_unavailable",
            ErrorKind::ConfigurationInvalid => "configuration_invalid",
            ErrorKind::ExternalBackend => "external_backend",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProvisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvisionError::Network(e) => network_kind(e),
            ProvisionError::Placement(e) => match e {
                PlacementError::ConfigurationInvalid(_) => ErrorKind::ConfigurationInvalid,
                PlacementError::AllocationExhausted { .. } => ErrorKind::AllocationExhausted,
            },
            ProvisionError::Deploy(e) => deploy_kind(e),
            ProvisionError::State(e) => state_kind(e),
            ProvisionError::VmNotFound(_) => ErrorKind::NotFound,
            ProvisionError::Config(_) => ErrorKind::ConfigurationInvalid,
            ProvisionError::Retained(_) => ErrorKind::ExternalBackend,
            ProvisionError::Compensation { primary, .. } => primary.kind(),
            ProvisionError::Teardown(errors) => errors
                .first()
                .map(ProvisionError::kind)
                .unwrap_or(ErrorKind::Internal),
        }
    }

    /// True when repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::ExternalBackend | ErrorKind::Timeout)
    }
}

fn network_kind(e: &NetworkError) -> ErrorKind {
    match e {
        NetworkError::Exhausted(_) => ErrorKind::AllocationExhausted,
        NetworkError::InvalidCidr(_) | NetworkError::Unsupported(_) | NetworkError::InvalidPrefix { .. } => {
            ErrorKind::ConfigurationInvalid
        }
        // Another caller took the subnet between read and write.
        NetworkError::AlreadyReserved(_) => ErrorKind::ExternalBackend,
        NetworkError::State(e) => state_kind(e),
    }
}

fn deploy_kind(e: &DeployError) -> ErrorKind {
    match e {
        DeployError::NotFound(_) => ErrorKind::NotFound,
        DeployError::Backend(_) | DeployError::Degraded { .. } => ErrorKind::ExternalBackend,
        DeployError::UnsupportedTarget(_) => ErrorKind::ConfigurationInvalid,
        DeployError::Timeout { .. } | DeployError::Cancelled(_) => ErrorKind::Timeout,
        DeployError::Join(_) => ErrorKind::Internal,
    }
}

fn state_kind(e: &StateError) -> ErrorKind {
    match e {
        StateError::QuotaUnavailable { .. } => ErrorKind::QuotaUnavailable,
        StateError::LockTimeout { .. } | StateError::Cancelled(_) => ErrorKind::Timeout,
        StateError::LockLost(_) => ErrorKind::ExternalBackend,
        _ => ErrorKind::Internal,
    }
}

fn join(errors: &[ProvisionError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
