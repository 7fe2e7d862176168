//! NetworkManager — lock-guarded subnet reservation.
//!
//! Reserved subnets of a pool live in the set `reserved_networks:{target}:{pool}`.
//! Reading that set, allocating and adding the new member happen under the
//! lock `network_manager_lock:{target}:{pool}`, so concurrent callers never
//! receive overlapping subnets.

use std::sync::Arc;

use bench_core::{Cancellation, Identifier, Network, Target};
use benchgrid_state::{DistributedLock, KvStore};
use tracing::{debug, info, warn};

use crate::allocator::SubnetAllocator;
use crate::error::{NetworkError, NetworkResult};

const NETWORK_LOCK_KEY: &str = "network_manager_lock";
const RESERVED_NETWORKS_KEY: &str = "reserved_networks";
const DEFAULT_IP_COUNT: usize = 3;

#[derive(Clone)]
pub struct NetworkManager {
    store: Arc<dyn KvStore>,
    lock: DistributedLock,
    allocator: SubnetAllocator,
}

impl NetworkManager {
    pub fn new(store: Arc<dyn KvStore>, lock: DistributedLock, allocator: SubnetAllocator) -> Self {
        Self {
            store,
            lock,
            allocator,
        }
    }

    /// Reserve the lowest free `/base_prefix` of `base_cidr` in the pool named by `identifier`.
    ///
    /// An `ip_count` of zero asks for the default of three addresses.
    pub async fn reserve_network(
        &self,
        identifier: &Identifier,
        base_cidr: &str,
        base_prefix: u8,
        ip_count: usize,
        cancel: &Cancellation,
    ) -> NetworkResult<Network> {
        let ip_count = if ip_count == 0 { DEFAULT_IP_COUNT } else { ip_count };
        let lock_name = pool_key(NETWORK_LOCK_KEY, identifier.target, &identifier.name);
        let storage_key = pool_key(RESERVED_NETWORKS_KEY, identifier.target, &identifier.name);

        let guard = self.lock.acquire(&lock_name, cancel).await?;

        let existing = self.store.set_members(&storage_key)?;
        let allocation =
            self.allocator
                .next_subnet_with_ips(base_cidr, base_prefix, &existing, ip_count)?;
        let cidr = allocation.subnet.to_string();

        // A lease that expired mid-allocation means someone else may hold the lock now.
        guard.check_held()?;
        let added = self.store.set_add(&storage_key, &[cidr.clone()])?;
        // The subnet is stored; failing here would leave it reserved with no owner.
        if let Err(e) = guard.release() {
            warn!(lock = %lock_name, %cidr, error = %e, "lock release after reservation failed");
        }

        if added == 0 {
            return Err(NetworkError::AlreadyReserved(cidr));
        }

        info!(
            id = %identifier.id,
            pool = %identifier.name,
            target = %identifier.target,
            %cidr,
            ips = allocation.ips.len(),
            existing = existing.len(),
            "network reserved"
        );

        Ok(Network {
            identifier: identifier.clone(),
            cidr,
            ips: allocation.ips,
        })
    }

    /// Return a network's subnet to its pool. Freeing an unknown subnet is not an error.
    pub fn free_network(&self, network: &Network) -> NetworkResult<()> {
        self.free_networks(std::slice::from_ref(network))
    }

    /// Return several networks at once; each is removed from its own pool.
    pub fn free_networks(&self, networks: &[Network]) -> NetworkResult<()> {
        for network in networks {
            if network.cidr.is_empty() {
                continue;
            }
            let storage_key = pool_key(
                RESERVED_NETWORKS_KEY,
                network.identifier.target,
                &network.identifier.name,
            );
            let removed = self
                .store
                .set_remove(&storage_key, &[network.cidr.clone()])?;
            if removed == 0 {
                debug!(cidr = %network.cidr, pool = %network.identifier.name, "network was not reserved");
            } else {
                info!(cidr = %network.cidr, pool = %network.identifier.name, "network freed");
            }
        }
        Ok(())
    }

    /// Subnets currently reserved in a pool.
    pub fn reserved(&self, target: Target, pool: &str) -> NetworkResult<Vec<String>> {
        Ok(self
            .store
            .set_members(&pool_key(RESERVED_NETWORKS_KEY, target, pool))?)
    }

    pub fn allocator(&self) -> &SubnetAllocator {
        &self.allocator
    }
}

fn pool_key(prefix: &str, target: Target, pool: &str) -> String {
    format!("{prefix}:{target}:{pool}")
}
