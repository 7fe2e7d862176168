//! Subnet and address allocator.
//!
//! A parent block is cut into `2^(new_prefix - parent_prefix)` candidate
//! subnets. The lowest-indexed candidate that overlaps no existing subnet
//! wins. Inside any subnet the network address and the next `padding`
//! addresses are never handed out, and neither is the broadcast address:
//!
//! ```text
//!   10.2.0.0  10.2.0.1..3   10.2.0.4 ...... 10.2.0.254  10.2.0.255
//!   network   padding       usable                      broadcast
//! ```

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use ipnet::{IpNet, Ipv4Net};

use crate::error::{NetworkError, NetworkResult};

/// Addresses reserved right after the network address.
pub const DEFAULT_PADDING: u32 = 3;

/// A chosen subnet and the addresses handed out of it, in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetAllocation {
    pub subnet: Ipv4Net,
    pub ips: Vec<Ipv4Addr>,
}

#[derive(Debug, Clone, Copy)]
pub struct SubnetAllocator {
    padding: u32,
}

impl Default for SubnetAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_PADDING)
    }
}

/// Inclusive `[start, end]` address range.
#[derive(Debug, Clone, Copy)]
struct Range {
    start: u64,
    end: u64,
}

impl Range {
    fn of(net: &Ipv4Net) -> Self {
        Self {
            start: u32::from(net.network()) as u64,
            end: u32::from(net.broadcast()) as u64,
        }
    }

    fn overlaps(&self, other: &Range) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl SubnetAllocator {
    pub fn new(padding: u32) -> Self {
        Self { padding }
    }

    pub fn padding(&self) -> u32 {
        self.padding
    }

    /// Pick the lowest free `/new_prefix` inside `parent` and `ip_count` addresses in it.
    ///
    /// Unparsable entries in `existing` are ignored.
    pub fn next_subnet_with_ips(
        &self,
        parent: &str,
        new_prefix: u8,
        existing: &[String],
        ip_count: usize,
    ) -> NetworkResult<SubnetAllocation> {
        let parent_net = parse_v4_net(parent)?.trunc();
        if new_prefix < parent_net.prefix_len() || new_prefix > 32 {
            return Err(NetworkError::InvalidPrefix {
                prefix: new_prefix,
                parent: parent.to_string(),
            });
        }

        let taken: Vec<Range> = existing
            .iter()
            .filter_map(|s| parse_v4_net(s).ok())
            .map(|n| Range::of(&n.trunc()))
            .collect();

        let base = u32::from(parent_net.network()) as u64;
        let size = 1u64 << (32 - new_prefix);
        let count = 1u64 << (new_prefix - parent_net.prefix_len());

        let mut index = 0u64;
        while index < count {
            let candidate = Range {
                start: base + index * size,
                end: base + (index + 1) * size - 1,
            };
            match taken.iter().find(|r| candidate.overlaps(r)) {
                // Every candidate starting at or before r.end overlaps r, skip past it.
                Some(r) => index = (index + 1).max((r.end + 1 - base).div_ceil(size)),
                None => {
                    let subnet = Ipv4Net::new(Ipv4Addr::from(candidate.start as u32), new_prefix)
                        .map_err(|e| NetworkError::InvalidCidr(e.to_string()))?;
                    let ips = self.addresses(&subnet, ip_count)?;
                    return Ok(SubnetAllocation { subnet, ips });
                }
            }
        }

        Err(NetworkError::Exhausted(format!(
            "no free /{new_prefix} subnet left in {parent}"
        )))
    }

    /// First address of `cidr` past the padding that is not in `used`.
    ///
    /// Used entries outside the block or of another family are ignored;
    /// IPv4-mapped IPv6 addresses are compared as IPv4.
    pub fn first_free_ip(&self, cidr: &str, used: &[String]) -> NetworkResult<Ipv4Addr> {
        let net = parse_v4_net(cidr)?.trunc();
        let (start, broadcast) = self.usable_bounds(&net);
        if start >= broadcast {
            return Err(NetworkError::Exhausted(format!(
                "{net} has no usable addresses after padding {}",
                self.padding
            )));
        }

        let used: HashSet<u64> = used
            .iter()
            .filter_map(|s| parse_v4_addr(s))
            .filter(|ip| net.contains(ip))
            .map(|ip| u32::from(ip) as u64)
            .collect();

        (start..broadcast)
            .find(|candidate| !used.contains(candidate))
            .map(|a| Ipv4Addr::from(a as u32))
            .ok_or_else(|| NetworkError::Exhausted(format!("no free address left in {net}")))
    }

    /// `ip_count` consecutive usable addresses of `subnet`.
    fn addresses(&self, subnet: &Ipv4Net, ip_count: usize) -> NetworkResult<Vec<Ipv4Addr>> {
        let (start, broadcast) = self.usable_bounds(subnet);
        let usable = broadcast.saturating_sub(start);
        if (ip_count as u64) > usable {
            return Err(NetworkError::Exhausted(format!(
                "{subnet} has {usable} usable addresses, {ip_count} requested"
            )));
        }
        Ok((start..start + ip_count as u64)
            .map(|a| Ipv4Addr::from(a as u32))
            .collect())
    }

    /// First usable address and the (exclusive) broadcast bound.
    fn usable_bounds(&self, net: &Ipv4Net) -> (u64, u64) {
        let range = Range::of(net);
        (range.start + self.padding as u64 + 1, range.end)
    }
}

/// Parse an IPv4 block, accepting IPv4-mapped IPv6 notation.
fn parse_v4_net(s: &str) -> NetworkResult<Ipv4Net> {
    let net = IpNet::from_str(s.trim()).map_err(|_| NetworkError::InvalidCidr(s.to_string()))?;
    match net {
        IpNet::V4(v4) => Ok(v4),
        IpNet::V6(v6) => match v6.addr().to_ipv4_mapped() {
            Some(addr) if v6.prefix_len() >= 96 => Ipv4Net::new(addr, v6.prefix_len() - 96)
                .map_err(|_| NetworkError::InvalidCidr(s.to_string())),
            _ => Err(NetworkError::Unsupported(format!("{s} is not IPv4"))),
        },
    }
}

fn parse_v4_addr(s: &str) -> Option<Ipv4Addr> {
    match IpAddr::from_str(s.trim()).ok()? {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}
