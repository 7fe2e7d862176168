//! Container model shared by every placement builder.
//!
//! A [`Container`] has one shape for all roles; what it *is* lives in its
//! [`ContainerRuntime`] payload.

use std::collections::BTreeMap;

use bench_core::Labels;
use serde::{Deserialize, Serialize};

use crate::template::{BackupConfig, BackupStorage, PicodataSettings, PoolMode, PostgresSettings};

// ── Images ─────────────────────────────────────────────────────────

pub const IMAGE_POSTGRES_REPO: &str = "postgres";
pub const IMAGE_ETCD: &str = "quay.io/coreos/etcd:v3.5.17";
pub const IMAGE_PGBOUNCER: &str = "edoburu/pgbouncer:latest";
pub const IMAGE_NODE_EXPORTER: &str = "prom/node-exporter:latest";
pub const IMAGE_POSTGRES_EXPORTER: &str = "prometheuscommunity/postgres-exporter:latest";
pub const IMAGE_PGBOUNCER_EXPORTER: &str = "quay.io/prometheuscommunity/pgbouncer-exporter:latest";
pub const IMAGE_PICODATA: &str = "docker.binary.picodata.io/picodata:latest";

// ── Ports ──────────────────────────────────────────────────────────

pub const PORT_POSTGRES: u16 = 5432;
pub const PORT_PATRONI_API: u16 = 8008;
pub const PORT_PGBOUNCER: u16 = 6432;
pub const PORT_ETCD_CLIENT: u16 = 2379;
pub const PORT_ETCD_PEER: u16 = 2380;
pub const PORT_NODE_EXPORTER: u16 = 9100;
pub const PORT_POSTGRES_EXPORTER: u16 = 9187;
pub const PORT_PGBOUNCER_EXPORTER: u16 = 9127;
pub const PORT_PICODATA_PG: u16 = 4327;
pub const PORT_PICODATA_IPROTO: u16 = 3301;
pub const PORT_PICODATA_HTTP: u16 = 8081;

// ── Metadata keys ──────────────────────────────────────────────────

pub const METADATA_NETWORK_IPV4: &str = "docker.network.ipv4";
pub const METADATA_PLACEMENT_NODE: &str = "docker.placement.node";
pub const METADATA_LOGICAL_NAME: &str = "docker.logical_name";

pub const DEFAULT_POSTGRES_USER: &str = "postgres";
pub const DEFAULT_POSTGRES_PASSWORD: &str = "postgres";
pub const DEFAULT_POSTGRES_DATABASE: &str = "postgres";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPort {
    pub name: String,
    pub container_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub ports: Vec<ContainerPort>,
    pub volumes: Vec<VolumeMount>,
    pub metadata: Labels,
    /// Scraped by the monitoring stack.
    pub monitor: bool,
    pub runtime: ContainerRuntime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostgresRole {
    Master,
    Replica,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExporterKind {
    Node,
    Postgres,
    Pgbouncer,
}

/// What a container runs, with the typed configuration for that role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContainerRuntime {
    Postgres {
        role: PostgresRole,
        replica_index: u32,
        settings: PostgresSettings,
    },
    Picodata {
        node_index: u32,
        settings: PicodataSettings,
    },
    /// A member of the distributed configuration store.
    Etcd {
        member_index: u32,
        cluster_size: u32,
        client_port: u16,
        peer_port: u16,
    },
    Pgbouncer {
        pool_size: u32,
        pool_mode: PoolMode,
        max_client_conn: Option<u32>,
        port: u16,
    },
    Exporter {
        kind: ExporterKind,
        port: u16,
        custom_queries_paths: Vec<String>,
    },
    Backup {
        config: BackupConfig,
    },
}

impl Container {
    /// A container with `id == name` and no env, ports or volumes yet.
    pub fn new(name: impl Into<String>, image: impl Into<String>, runtime: ContainerRuntime) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            image: image.into(),
            command: Vec::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            metadata: Labels::new(),
            monitor: false,
            runtime,
        }
    }

    pub fn with_port(mut self, name: &str, port: u16) -> Self {
        self.ports.push(ContainerPort {
            name: name.to_string(),
            container_port: port,
        });
        self
    }

    pub fn with_volume(mut self, name: impl Into<String>, mount_path: &str) -> Self {
        self.volumes.push(VolumeMount {
            name: name.into(),
            mount_path: mount_path.to_string(),
        });
        self
    }

    pub fn with_env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.insert(key.to_string(), value.into());
        self
    }

    pub fn monitored(mut self, monitor: bool) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn set_env(&mut self, key: &str, value: impl Into<String>) {
        self.env.insert(key.to_string(), value.into());
    }

    pub fn logical_name(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else if !self.id.is_empty() {
            &self.id
        } else {
            "container"
        }
    }
}

pub fn node_exporter(suffix: &str, port: Option<u16>) -> Container {
    let port = port.unwrap_or(PORT_NODE_EXPORTER);
    Container::new(
        format!("node-exporter-{suffix}"),
        IMAGE_NODE_EXPORTER,
        ContainerRuntime::Exporter {
            kind: ExporterKind::Node,
            port,
            custom_queries_paths: Vec::new(),
        },
    )
    .with_port("metrics", port)
    .monitored(true)
}

pub fn postgres_exporter(suffix: &str, port: Option<u16>, custom_queries_paths: Vec<String>) -> Container {
    let port = port.unwrap_or(PORT_POSTGRES_EXPORTER);
    let mut container = Container::new(
        format!("postgres-exporter-{suffix}"),
        IMAGE_POSTGRES_EXPORTER,
        ContainerRuntime::Exporter {
            kind: ExporterKind::Postgres,
            port,
            custom_queries_paths: custom_queries_paths.clone(),
        },
    )
    .with_port("metrics", port)
    .monitored(true);
    if !custom_queries_paths.is_empty() {
        container.set_env("PG_EXPORTER_EXTEND_QUERY_PATH", custom_queries_paths.join(","));
    }
    container
}

pub fn pgbouncer_exporter(suffix: &str) -> Container {
    Container::new(
        format!("pgbouncer-exporter-{suffix}"),
        IMAGE_PGBOUNCER_EXPORTER,
        ContainerRuntime::Exporter {
            kind: ExporterKind::Pgbouncer,
            port: PORT_PGBOUNCER_EXPORTER,
            custom_queries_paths: Vec::new(),
        },
    )
    .with_port("metrics", PORT_PGBOUNCER_EXPORTER)
    .monitored(true)
}

/// Backup agent; `image` is the engine image so the agent ships matching client tools.
pub fn backup_agent(name: String, image: &str, config: &BackupConfig) -> Container {
    let mut container = Container::new(
        name,
        image,
        ContainerRuntime::Backup {
            config: config.clone(),
        },
    )
    .with_env("BACKUP_SCHEDULE", config.schedule.as_str())
    .with_env("BACKUP_RETENTION", config.retention.to_string())
    .with_env("BACKUP_TOOL", config.tool.as_str());
    match &config.storage {
        BackupStorage::Local { path } => {
            container.set_env("BACKUP_LOCAL_PATH", path.as_str());
            let volume = format!("{}-data", container.name);
            container = container.with_volume(volume, path);
        }
        BackupStorage::S3 {
            bucket,
            endpoint,
            prefix,
        } => {
            container.set_env("BACKUP_S3_BUCKET", bucket.as_str());
            container.set_env("BACKUP_S3_ENDPOINT", endpoint.as_str());
            container.set_env("BACKUP_S3_PREFIX", prefix.as_str());
        }
    }
    container
}

/// Render `conf` as repeated `flag key=value` pairs, ordered by key.
pub fn conf_args(flag: &str, conf: &BTreeMap<String, String>) -> Vec<String> {
    conf.iter()
        .flat_map(|(k, v)| [flag.to_string(), format!("{k}={v}")])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::BackupTool;

    #[test]
    fn conf_args_sorted_by_key() {
        let conf = BTreeMap::from([
            ("shared_buffers".to_string(), "256MB".to_string()),
            ("max_connections".to_string(), "1000".to_string()),
        ]);
        assert_eq!(
            conf_args("-c", &conf).join(" "),
            "-c max_connections=1000 -c shared_buffers=256MB"
        );
    }

    #[test]
    fn logical_name_falls_back() {
        let mut c = node_exporter("x", None);
        assert_eq!(c.logical_name(), "node-exporter-x");
        c.name.clear();
        assert_eq!(c.logical_name(), "node-exporter-x");
        c.id.clear();
        assert_eq!(c.logical_name(), "container");
    }

    #[test]
    fn local_backup_mounts_path() {
        let config = BackupConfig {
            schedule: "0 * * * *".to_string(),
            retention: 3,
            tool: BackupTool::WalG,
            storage: BackupStorage::Local {
                path: "/backups".to_string(),
            },
        };
        let c = backup_agent("backup-master".to_string(), "postgres:17-alpine", &config);
        assert_eq!(c.env["BACKUP_TOOL"], "wal-g");
        assert_eq!(c.volumes[0].mount_path, "/backups");
        assert!(!c.monitor);
    }

    #[test]
    fn runtime_serializes_tagged() {
        let c = pgbouncer_exporter("1");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["runtime"]["type"], "exporter");
        assert_eq!(json["runtime"]["kind"], "pgbouncer");
    }
}
