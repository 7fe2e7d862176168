//! benchgrid-deploy — deployments on a backend and their convergence.
//!
//! ```text
//!  DeploymentTemplate ──create──▶ Deployment (all CREATING)
//!                                    │
//!                         process_deployment_status (polled)
//!                                    ▼
//!                     READY  |  DEGRADED (self-heal delete)  |  DESTROYED
//! ```
//!
//! # Components
//!
//! - **`service`** — the `DeploymentService` contract
//! - **`reconciler`** — status state machine over a `ResourceBackend`
//! - **`registry`** — backend per target
//! - **`memory`** — in-process backend for tests and dry runs
//! - **`wait`** — bounded concurrent readiness polling

pub mod error;
pub mod memory;
pub mod reconciler;
pub mod registry;
pub mod service;
pub mod types;
pub mod wait;

pub use error::{DeployError, DeployResult};
pub use memory::MemoryBackend;
pub use reconciler::{DeploymentReconciler, Observation, ResourceBackend};
pub use registry::DeploymentRegistry;
pub use service::{DeployFuture, DeploymentService};
pub use types::{Deployment, DeploymentTemplate, Resource, ResourceStatus, Vm, VmTemplate};
pub use wait::{WaitOptions, wait_until_ready};
