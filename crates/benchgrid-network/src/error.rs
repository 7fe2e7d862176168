//! Network allocation error types.

use thiserror::Error;

/// Errors that can occur while allocating or reserving networks.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("invalid cidr: {0}")]
    InvalidCidr(String),

    #[error("unsupported address family: {0}")]
    Unsupported(String),

    #[error("prefix /{prefix} is not within parent {parent}")]
    InvalidPrefix { prefix: u8, parent: String },

    #[error("allocation exhausted: {0}")]
    Exhausted(String),

    #[error("subnet {0} already reserved")]
    AlreadyReserved(String),

    #[error("state store error: {0}")]
    State(#[from] benchgrid_state::StateError),
}

pub type NetworkResult<T> = Result<T, NetworkError>;
