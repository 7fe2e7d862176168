//! benchgrid-state — shared coordination state for provisioning runs.
//!
//! Backed by [redb](https://docs.rs/redb), provides the key-value contract
//! every run coordinates through:
//!
//! ```text
//!   NetworkManager ──► DistributedLock ──► leases table
//!         │                                    │
//!         └──────────► sets table        KvStore (StateStore)
//!   QuotaLedger ─────► counters table ─────────┘
//! ```
//!
//! Multi-key operations (quota reserve/free, lease takeover) run inside a
//! single redb write transaction, so they are atomic with respect to every
//! other caller sharing the database. `KvStore` is the seam where a
//! networked store with server-side scripting can be substituted.

pub mod error;
pub mod lock;
pub mod quota;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use lock::{DistributedLock, LockGuard, LockOptions};
pub use quota::QuotaLedger;
pub use store::{KvStore, Lease, StateStore};
