//! benchd.toml configuration parser.
//!
//! Every section is optional; missing values fall back to the defaults a
//! single-host docker run needs. Durations are written as strings like
//! `"5s"`, `"500ms"`, `"10m"` or `"1h"`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{QuotaKind, QuotaLimit, Target};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub state: StateConfig,
    pub network: NetworkConfig,
    pub allocator: AllocatorConfig,
    pub lock: LockConfig,
    pub quotas: QuotasConfig,
    pub reconcile: ReconcileConfig,
    pub cleanup: CleanupConfig,
    pub orchestration: OrchestrationConfig,
    pub vm: VmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub data_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/benchgrid"),
        }
    }
}

/// Parent block and subnet size used for one family of targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRange {
    /// Pool name; reservations in the same pool never overlap.
    pub name: String,
    pub base_cidr: String,
    pub prefix: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub docker: NetworkRange,
    pub cloud: NetworkRange,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            docker: NetworkRange {
                name: "benchgrid-docker".to_string(),
                base_cidr: "172.28.0.0/16".to_string(),
                prefix: 24,
            },
            cloud: NetworkRange {
                name: "benchgrid-cloud".to_string(),
                base_cidr: "10.2.0.0/16".to_string(),
                prefix: 24,
            },
        }
    }
}

impl NetworkConfig {
    pub fn range_for(&self, target: Target) -> &NetworkRange {
        if target.is_local() {
            &self.docker
        } else {
            &self.cloud
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Addresses skipped right after the network address of every subnet.
    pub padding: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self { padding: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub key_prefix: String,
    pub lease_ttl: String,
    pub extend_interval: String,
    pub retry_initial: String,
    pub retry_max: String,
    pub wait_timeout: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key_prefix: "lock:".to_string(),
            lease_ttl: "5s".to_string(),
            extend_interval: "1s".to_string(),
            retry_initial: "50ms".to_string(),
            retry_max: "1s".to_string(),
            wait_timeout: "30s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotasConfig {
    /// Maxima per scope, e.g. `[quotas.limits.yandex_cloud] VM = 20`.
    pub limits: BTreeMap<Target, BTreeMap<QuotaKind, i64>>,
}

impl Default for QuotasConfig {
    fn default() -> Self {
        let mut limits = BTreeMap::new();
        limits.insert(
            Target::YandexCloud,
            BTreeMap::from([
                (QuotaKind::Vm, 20),
                (QuotaKind::Subnet, 10),
                (QuotaKind::PublicIpAddress, 1),
            ]),
        );
        limits.insert(
            Target::Docker,
            BTreeMap::from([(QuotaKind::Vm, 64), (QuotaKind::Subnet, 32)]),
        );
        Self { limits }
    }
}

impl QuotasConfig {
    /// Flatten into one limit per `(scope, kind)`, ordered by scope then kind.
    pub fn to_limits(&self) -> Vec<QuotaLimit> {
        self.limits
            .iter()
            .flat_map(|(scope, kinds)| {
                kinds.iter().map(|(kind, maximum)| QuotaLimit {
                    scope: *scope,
                    kind: *kind,
                    maximum: *maximum,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub poll_interval: String,
    /// How long a resource may stay CREATING or DESTROYING before it is DEGRADED.
    pub reconcile_interval: String,
    pub wait_deadline: String,
    pub max_concurrent_polls: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval: "5s".to_string(),
            reconcile_interval: "10m".to_string(),
            wait_deadline: "30m".to_string(),
            max_concurrent_polls: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub attempts: u32,
    pub backoff: String,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: "2s".to_string(),
        }
    }
}

/// Connection parameters handed to edge workers through their bootstrap env.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub host_port: String,
    pub token: String,
    pub tls_strategy: String,
    pub log_level: String,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            host_port: "localhost:7077".to_string(),
            token: String::new(),
            tls_strategy: "none".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmUser {
    pub name: String,
    pub groups: Vec<String>,
    pub ssh_authorized_keys: Vec<String>,
    pub sudo: bool,
}

impl Default for VmUser {
    fn default() -> Self {
        Self {
            name: "stroppy-edge-worker".to_string(),
            groups: vec!["stroppy-edge-worker".to_string()],
            ssh_authorized_keys: Vec::new(),
            sudo: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub base_image_id: String,
    pub public_ip: bool,
    pub user: VmUser,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            base_image_id: "ubuntu-22-04".to_string(),
            public_ip: false,
            user: VmUser::default(),
        }
    }
}

impl BenchConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BenchConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject durations that don't parse and a lock that would expire between extensions.
    pub fn validate(&self) -> anyhow::Result<()> {
        let ttl = duration_field("lock.lease_ttl", &self.lock.lease_ttl)?;
        let extend = duration_field("lock.extend_interval", &self.lock.extend_interval)?;
        if extend >= ttl {
            anyhow::bail!(
                "lock.extend_interval ({}) must be shorter than lock.lease_ttl ({})",
                self.lock.extend_interval,
                self.lock.lease_ttl
            );
        }
        duration_field("lock.retry_initial", &self.lock.retry_initial)?;
        duration_field("lock.retry_max", &self.lock.retry_max)?;
        duration_field("lock.wait_timeout", &self.lock.wait_timeout)?;
        duration_field("reconcile.poll_interval", &self.reconcile.poll_interval)?;
        duration_field("reconcile.reconcile_interval", &self.reconcile.reconcile_interval)?;
        duration_field("reconcile.wait_deadline", &self.reconcile.wait_deadline)?;
        duration_field("cleanup.backoff", &self.cleanup.backoff)?;
        if self.reconcile.max_concurrent_polls == 0 {
            anyhow::bail!("reconcile.max_concurrent_polls must be at least 1");
        }
        Ok(())
    }
}

/// Parse a duration field, naming the field on failure.
pub fn duration_field(field: &str, value: &str) -> anyhow::Result<Duration> {
    parse_duration(value).ok_or_else(|| anyhow::anyhow!("{field}: invalid duration {value:?}"))
}

/// Parse a duration string like "5s", "500ms", "2m" or "1h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
