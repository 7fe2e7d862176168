//! Placement error types.

use thiserror::Error;

/// Errors raised while expanding or wiring a placement.
///
/// None of these are retried; they describe the template, not the world.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("network has {available} addresses, but {required} items are required")]
    AllocationExhausted { required: usize, available: usize },
}

pub type PlacementResult<T> = Result<T, PlacementError>;

/// Shorthand for a `ConfigurationInvalid` error.
pub(crate) fn invalid(msg: impl Into<String>) -> PlacementError {
    PlacementError::ConfigurationInvalid(msg.into())
}
