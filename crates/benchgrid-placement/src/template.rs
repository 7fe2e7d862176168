//! Declarative database templates.
//!
//! A template is exactly one of four variants. Cluster templates describe a
//! topology (master plus replicas, or N equal nodes) and optional addons
//! placed either next to existing nodes or on dedicated ones.

use std::collections::BTreeMap;

use bench_core::Hardware;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatabaseTemplate {
    PostgresInstance(PostgresInstanceTemplate),
    PostgresCluster(PostgresClusterTemplate),
    PicodataInstance(PicodataInstanceTemplate),
    PicodataCluster(PicodataClusterTemplate),
}

// ── Shared ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    pub schedule: String,
    #[serde(default = "default_retention")]
    pub retention: u32,
    #[serde(default)]
    pub tool: BackupTool,
    pub storage: BackupStorage,
}

fn default_retention() -> u32 {
    7
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupTool {
    #[default]
    WalG,
    PgBackRest,
}

impl BackupTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupTool::WalG => "wal-g",
            BackupTool::PgBackRest => "pgbackrest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackupStorage {
    Local { path: String },
    S3 { bucket: String, endpoint: String, prefix: String },
}

/// Where a colocated addon runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementScope {
    Master,
    Replicas,
    AllNodes,
    /// One replica; needs a `replica_index`.
    Replica,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AddonPlacement {
    /// Run on existing topology nodes.
    Colocate {
        scope: PlacementScope,
        #[serde(default)]
        replica_index: Option<u32>,
    },
    /// Run on new addon-only nodes.
    Dedicated {
        instances_count: u32,
        #[serde(default)]
        hardware: Option<Hardware>,
    },
}

// ── Postgres ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostgresSettings {
    #[serde(default = "default_pg_version")]
    pub version: u32,
    #[serde(default)]
    pub storage_engine: StorageEngine,
    #[serde(default)]
    pub patroni: PatroniSettings,
    #[serde(default)]
    pub postgresql_conf: BTreeMap<String, String>,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            version: default_pg_version(),
            storage_engine: StorageEngine::default(),
            patroni: PatroniSettings::default(),
            postgresql_conf: BTreeMap::new(),
        }
    }
}

fn default_pg_version() -> u32 {
    17
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageEngine {
    #[default]
    Heap,
    Orioledb,
}

/// High-availability manager. Needs an etcd addon when enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatroniSettings {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostgresSidecar {
    NodeExporter {
        #[serde(default)]
        port: Option<u16>,
    },
    PostgresExporter {
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        custom_queries_paths: Vec<String>,
    },
    Backup(BackupConfig),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostgresInstanceTemplate {
    #[serde(default)]
    pub settings: PostgresSettings,
    #[serde(default)]
    pub hardware: Option<Hardware>,
    #[serde(default)]
    pub sidecars: Vec<PostgresSidecar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostgresClusterTemplate {
    #[serde(default)]
    pub topology: Option<PostgresTopology>,
    #[serde(default)]
    pub replica_overrides: Vec<ReplicaOverride>,
    #[serde(default)]
    pub addons: PostgresAddons,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostgresTopology {
    #[serde(default)]
    pub settings: PostgresSettings,
    #[serde(default)]
    pub master_hardware: Option<Hardware>,
    #[serde(default)]
    pub replica_hardware: Option<Hardware>,
    #[serde(default)]
    pub replicas_count: u32,
    /// Attach exporter sidecars to every node.
    #[serde(default)]
    pub monitor: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaOverride {
    pub replica_index: u32,
    #[serde(default)]
    pub hardware: Option<Hardware>,
    #[serde(default)]
    pub settings: Option<PostgresSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostgresAddons {
    #[serde(default)]
    pub etcd: Option<EtcdAddon>,
    #[serde(default)]
    pub pgbouncer: Option<PgbouncerAddon>,
    #[serde(default)]
    pub backup: Option<BackupAddon>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtcdAddon {
    /// Expected member count; zero means "however many the placement yields".
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub placement: Option<AddonPlacement>,
    #[serde(default)]
    pub client_port: Option<u16>,
    #[serde(default)]
    pub monitor: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PgbouncerAddon {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default)]
    pub pool_mode: PoolMode,
    #[serde(default)]
    pub max_client_conn: Option<u32>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub placement: Option<AddonPlacement>,
    #[serde(default)]
    pub monitor: bool,
}

fn default_pool_size() -> u32 {
    20
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolMode {
    Session,
    #[default]
    Transaction,
    Statement,
}

impl PoolMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolMode::Session => "session",
            PoolMode::Transaction => "transaction",
            PoolMode::Statement => "statement",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupAddon {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub scope: Option<PlacementScope>,
    #[serde(default)]
    pub replica_index: Option<u32>,
    #[serde(default)]
    pub config: Option<BackupConfig>,
}

// ── Picodata ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PicodataSettings {
    #[serde(default)]
    pub picodata_conf: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PicodataSidecar {
    NodeExporter {
        #[serde(default)]
        port: Option<u16>,
    },
    HttpMetrics {
        #[serde(default)]
        port: Option<u16>,
    },
    Backup(BackupConfig),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PicodataInstanceTemplate {
    #[serde(default)]
    pub settings: PicodataSettings,
    #[serde(default)]
    pub hardware: Option<Hardware>,
    #[serde(default)]
    pub sidecars: Vec<PicodataSidecar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PicodataClusterTemplate {
    #[serde(default)]
    pub topology: Option<PicodataTopology>,
    #[serde(default)]
    pub node_overrides: Vec<NodeOverride>,
    #[serde(default)]
    pub addons: PicodataAddons,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PicodataTopology {
    pub nodes_count: u32,
    #[serde(default)]
    pub node_hardware: Option<Hardware>,
    #[serde(default)]
    pub settings: PicodataSettings,
    #[serde(default)]
    pub monitor: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOverride {
    pub node_index: u32,
    #[serde(default)]
    pub hardware: Option<Hardware>,
    #[serde(default)]
    pub settings: Option<PicodataSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PicodataAddons {
    #[serde(default)]
    pub backup: Option<PicodataBackupAddon>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PicodataScope {
    AllNodes,
    /// One node; needs a `node_index`.
    Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PicodataBackupAddon {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub scope: Option<PicodataScope>,
    #[serde(default)]
    pub node_index: Option<u32>,
    #[serde(default)]
    pub config: Option<BackupConfig>,
}
