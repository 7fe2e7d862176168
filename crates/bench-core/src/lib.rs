//! bench-core — types shared by every benchgrid crate.
//!
//! Holds the vocabulary of a provisioning run (targets, hardware, networks,
//! quotas, run identity) and the `benchd.toml` configuration model.

pub mod cancel;
pub mod config;
pub mod types;

pub use cancel::{CancelHandle, Cancellation};
pub use config::BenchConfig;
pub use types::*;
