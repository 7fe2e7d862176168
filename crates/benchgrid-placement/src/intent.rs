//! Placement items, the two-phase builder contract and address binding.

use std::net::Ipv4Addr;

use bench_core::{Hardware, Labels, Network};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::container::{
    Container, METADATA_LOGICAL_NAME, METADATA_NETWORK_IPV4, METADATA_PLACEMENT_NODE,
};
use crate::error::{PlacementError, PlacementResult, invalid};

/// One logical node: a VM or container group bound to one address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementItem {
    pub name: String,
    pub hardware: Hardware,
    pub internal_ip: Option<Ipv4Addr>,
    pub containers: Vec<Container>,
    pub metadata: Labels,
}

impl PlacementItem {
    pub fn new(name: &str, hardware: Hardware) -> Self {
        Self {
            name: name.to_string(),
            hardware,
            internal_ip: None,
            containers: Vec::new(),
            metadata: Labels::new(),
        }
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// Items of one database topology, bound and wired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementIntent {
    pub items: Vec<PlacementItem>,
    pub network: Network,
    pub connection_string: String,
}

impl PlacementIntent {
    pub fn item(&self, name: &str) -> Option<&PlacementItem> {
        self.items.iter().find(|i| i.name == name)
    }
}

/// Items under construction, kept in creation order.
#[derive(Debug, Default)]
pub struct ItemSet {
    items: Vec<PlacementItem>,
}

impl ItemSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the item named `name`, creating it at the end if absent.
    ///
    /// A new item needs hardware; an existing one keeps what it has.
    pub fn ensure(&mut self, name: &str, hardware: Option<&Hardware>) -> PlacementResult<&mut PlacementItem> {
        let index = match self.items.iter().position(|i| i.name == name) {
            Some(index) => index,
            None => {
                let hardware = hardware
                    .ok_or_else(|| invalid(format!("hardware is required for item {name:?}")))?;
                self.items.push(PlacementItem::new(name, hardware.clone()));
                self.items.len() - 1
            }
        };
        Ok(&mut self.items[index])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PlacementItem> {
        self.items.iter_mut().find(|i| i.name == name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|i| i.name.clone()).collect()
    }

    /// Bind `network.ips[i]` to the i-th created item and stamp container metadata.
    pub fn bind(self, network: &Network) -> PlacementResult<Vec<PlacementItem>> {
        if network.ips.len() < self.items.len() {
            return Err(PlacementError::AllocationExhausted {
                required: self.items.len(),
                available: network.ips.len(),
            });
        }
        let mut items = self.items;
        for (item, ip) in items.iter_mut().zip(&network.ips) {
            item.internal_ip = Some(*ip);
            for c in &mut item.containers {
                let logical = c.logical_name().to_string();
                c.metadata.insert(METADATA_NETWORK_IPV4.to_string(), ip.to_string());
                c.metadata
                    .insert(METADATA_PLACEMENT_NODE.to_string(), item.name.clone());
                c.metadata.insert(METADATA_LOGICAL_NAME.to_string(), logical);
            }
        }
        debug!(items = items.len(), cidr = %network.cidr, "placement items bound");
        Ok(items)
    }
}

/// A database family's placement logic, split into two passes.
///
/// `plan` expands the topology (including dedicated addon items) without
/// addresses. `wire` runs after every item has an address and resolves the
/// configuration that depends on other items, returning the client
/// connection string.
pub trait PlacementBuilder {
    fn plan(&self) -> PlacementResult<ItemSet>;

    fn wire(&self, items: &mut [PlacementItem]) -> PlacementResult<String>;
}

/// Run plan, bind and wire against an allocated network.
pub fn build_intent<B: PlacementBuilder + ?Sized>(
    builder: &B,
    network: &Network,
) -> PlacementResult<PlacementIntent> {
    let planned = builder.plan()?;
    if planned.is_empty() {
        return Err(invalid("placement has no items"));
    }
    let mut items = planned.bind(network)?;
    let connection_string = builder.wire(&mut items)?;
    Ok(PlacementIntent {
        items,
        network: network.clone(),
        connection_string,
    })
}

/// Address of an item that has been through `bind`.
pub(crate) fn bound_ip(item: &PlacementItem) -> PlacementResult<Ipv4Addr> {
    item.internal_ip
        .ok_or_else(|| invalid(format!("item {:?} has no bound address", item.name)))
}

/// Reject override indices that are out of range or repeated.
pub(crate) fn validate_overrides(
    what: &str,
    indices: impl IntoIterator<Item = u32>,
    count: u32,
) -> PlacementResult<()> {
    let mut seen = std::collections::HashSet::new();
    for index in indices {
        if index >= count {
            return Err(invalid(format!(
                "{what} override index {index} is out of range for {count} {what}s"
            )));
        }
        if !seen.insert(index) {
            return Err(invalid(format!("duplicate {what} override for index {index}")));
        }
    }
    Ok(())
}
