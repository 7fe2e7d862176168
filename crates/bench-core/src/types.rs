//! Shared types used across benchgrid crates.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Backend a run is provisioned on. Doubles as the quota scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Local container runtime.
    Docker,
    /// Cloud VM provisioner.
    YandexCloud,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Docker => "docker",
            Target::YandexCloud => "yandex_cloud",
        }
    }

    /// True for backends that run containers on the local host.
    pub fn is_local(&self) -> bool {
        matches!(self, Target::Docker)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names a resource owned by a run on a given target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub id: String,
    pub name: String,
    pub target: Target,
}

impl Identifier {
    /// Create an identifier with a fresh time-ordered id.
    pub fn new(name: &str, target: Target) -> Self {
        Self {
            id: new_id(),
            name: name.to_string(),
            target,
        }
    }
}

/// Hardware requested for one placement item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hardware {
    pub cores: u32,
    pub memory_gb: u32,
    pub disk_gb: u32,
}

impl Hardware {
    pub fn new(cores: u32, memory_gb: u32, disk_gb: u32) -> Self {
        Self {
            cores,
            memory_gb,
            disk_gb,
        }
    }
}

/// A reserved subnet and the addresses handed out of it.
///
/// The address list is fixed when the network is reserved; placement
/// consumes it strictly in item-creation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub identifier: Identifier,
    pub cidr: String,
    pub ips: Vec<Ipv4Addr>,
}

/// Identity of one provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: String,
    pub target: Target,
}

impl RunContext {
    pub fn new(target: Target) -> Self {
        Self {
            run_id: new_id(),
            target,
        }
    }
}

/// Resource kind tracked by a quota counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotaKind {
    Vm,
    Subnet,
    PublicIpAddress,
}

impl QuotaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaKind::Vm => "VM",
            QuotaKind::Subnet => "SUBNET",
            QuotaKind::PublicIpAddress => "PUBLIC_IP_ADDRESS",
        }
    }
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An amount of one quota counter, used for both reserve and free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub scope: Target,
    pub kind: QuotaKind,
    pub amount: i64,
}

impl Quota {
    pub fn new(scope: Target, kind: QuotaKind, amount: i64) -> Self {
        Self {
            scope,
            kind,
            amount,
        }
    }

    /// Store key of the counter, `{scope}:{kind}`.
    pub fn key(&self) -> String {
        quota_key(self.scope, self.kind)
    }
}

/// Store key for a quota counter.
pub fn quota_key(scope: Target, kind: QuotaKind) -> String {
    format!("{scope}:{kind}")
}

/// Maximum of a quota counter, applied once when the counter is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimit {
    pub scope: Target,
    pub kind: QuotaKind,
    pub maximum: i64,
}

/// Free-form string labels attached to items, containers and VMs.
pub type Labels = BTreeMap<String, String>;

/// Generate a new lowercase time-ordered id.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}

/// Current time as seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current time as milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_key_format() {
        let q = Quota::new(Target::YandexCloud, QuotaKind::Vm, 1);
        assert_eq!(q.key(), "yandex_cloud:VM");
        assert_eq!(
            quota_key(Target::Docker, QuotaKind::PublicIpAddress),
            "docker:PUBLIC_IP_ADDRESS"
        );
    }

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn target_serde_names() {
        let json = serde_json::to_string(&Target::YandexCloud).unwrap();
        assert_eq!(json, "\"yandex_cloud\"");
        let kind: QuotaKind = serde_json::from_str("\"PUBLIC_IP_ADDRESS\"").unwrap();
        assert_eq!(kind, QuotaKind::PublicIpAddress);
    }

    #[test]
    fn network_roundtrips_addresses() {
        let net = Network {
            identifier: Identifier::new("bench", Target::Docker),
            cidr: "172.28.0.0/24".to_string(),
            ips: vec![Ipv4Addr::new(172, 28, 0, 4)],
        };
        let json = serde_json::to_string(&net).unwrap();
        assert!(json.contains("172.28.0.4"));
        let back: Network = serde_json::from_str(&json).unwrap();
        assert_eq!(back, net);
    }
}
