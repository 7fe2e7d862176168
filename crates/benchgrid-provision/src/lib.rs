//! benchgrid-provision — provisioning and teardown of benchmark runs.
//!
//! Ties the lower crates together for one run:
//!
//! ```text
//!   QuotaLedger ──┐
//!   NetworkManager ├──▶ ProvisionerService ──▶ DeploymentRegistry ──▶ DeploymentService
//!   placement ────┘         │
//!                           └── UnitOfWork (compensations, newest first)
//! ```
//!
//! # Components
//!
//! - **`provisioner`** — `ProvisionerService`: acquire network, plan, build, deploy, destroy, run lifecycle
//! - **`worker`** — edge worker identities, task ids and bootstrap environment
//! - **`uow`** — unit of work with LIFO compensations
//! - **`error`** — `ProvisionError` and its caller-facing `ErrorKind`

pub mod error;
pub mod provisioner;
pub mod uow;
pub mod worker;

pub use error::{ErrorKind, ProvisionError, ProvisionResult};
pub use provisioner::{
    DEPLOYMENT_NAME, DatabaseRef, DeployedItem, DeployedPlacement, PlacedItem, Placement, ProvisionRequest,
    ProvisionedRun, ProvisionerService, ProvisionerSettings,
};
pub use uow::UnitOfWork;
pub use worker::{TaskId, TaskKind, Worker};
