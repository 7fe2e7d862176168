//! benchgrid-network — subnet and address allocation for provisioning runs.
//!
//! [`SubnetAllocator`] is pure: given a parent block and the subnets already
//! taken, it picks the lowest free fixed-size subnet and the addresses in it.
//! [`NetworkManager`] makes that linearizable across processes by running
//! read-existing, allocate and persist under a distributed lock.

pub mod allocator;
pub mod error;
pub mod manager;

pub use allocator::{DEFAULT_PADDING, SubnetAllocation, SubnetAllocator};
pub use error::{NetworkError, NetworkResult};
pub use manager::NetworkManager;
