//! `benchd reserve-network` and `benchd free-network`.

use bench_core::{BenchConfig, Cancellation, Identifier, Network, Target};
use benchgrid_network::{NetworkManager, SubnetAllocator};
use benchgrid_state::{DistributedLock, KvStore, LockOptions};
use std::sync::Arc;
use tracing::info;

use super::{open_store, print_json};

fn manager(config: &BenchConfig, store: Arc<dyn KvStore>) -> anyhow::Result<NetworkManager> {
    let lock = DistributedLock::new(store.clone(), LockOptions::from_config(&config.lock)?);
    Ok(NetworkManager::new(
        store,
        lock,
        SubnetAllocator::new(config.allocator.padding),
    ))
}

pub async fn reserve(config: &BenchConfig, target: Target, count: usize) -> anyhow::Result<()> {
    let network = reserve_in(config, open_store(config)?, target, count).await?;
    info!(cidr = %network.cidr, ips = network.ips.len(), "network reserved");
    print_json(&network)
}

pub fn free(config: &BenchConfig, target: Target, cidr: &str) -> anyhow::Result<()> {
    free_in(config, open_store(config)?, target, cidr)?;
    info!(cidr, "network freed");
    Ok(())
}

pub(crate) async fn reserve_in(
    config: &BenchConfig,
    store: Arc<dyn KvStore>,
    target: Target,
    count: usize,
) -> anyhow::Result<Network> {
    let range = config.network.range_for(target);
    let (cancel_handle, cancel) = Cancellation::pair();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_handle.cancel();
        }
    });
    let result = manager(config, store)?
        .reserve_network(
            &Identifier::new(&range.name, target),
            &range.base_cidr,
            range.prefix,
            count,
            &cancel,
        )
        .await;
    ctrl_c.abort();
    Ok(result?)
}

pub(crate) fn free_in(
    config: &BenchConfig,
    store: Arc<dyn KvStore>,
    target: Target,
    cidr: &str,
) -> anyhow::Result<()> {
    let range = config.network.range_for(target);
    let network = Network {
        identifier: Identifier::new(&range.name, target),
        cidr: cidr.to_string(),
        ips: Vec::new(),
    };
    manager(config, store)?.free_network(&network)?;
    Ok(())
}
