//! Picodata placement: one instance or N equal nodes, with an optional
//! backup addon. Database metrics come from picodata's own HTTP endpoint;
//! monitoring only adds a node exporter per node.

use tracing::debug;

use crate::container::*;
use crate::error::{PlacementResult, invalid};
use crate::intent::{ItemSet, PlacementBuilder, PlacementItem, bound_ip, validate_overrides};
use crate::template::{
    PicodataBackupAddon, PicodataClusterTemplate, PicodataInstanceTemplate, PicodataScope,
    PicodataSettings, PicodataSidecar,
};

const PICODATA_DATA: &str = "/pico/data";
const HTTP_LISTEN_ENV: &str = "PICODATA_HTTP_LISTEN";

pub fn node_item(index: u32) -> String {
    format!("picodata-node-{index}")
}

#[derive(Debug, Clone, Copy)]
pub enum PicodataTemplate<'a> {
    Instance(&'a PicodataInstanceTemplate),
    Cluster(&'a PicodataClusterTemplate),
}

#[derive(Debug, Clone, Copy)]
pub struct PicodataPlacementBuilder<'a> {
    template: PicodataTemplate<'a>,
}

impl<'a> PicodataPlacementBuilder<'a> {
    pub fn instance(template: &'a PicodataInstanceTemplate) -> Self {
        Self {
            template: PicodataTemplate::Instance(template),
        }
    }

    pub fn cluster(template: &'a PicodataClusterTemplate) -> Self {
        Self {
            template: PicodataTemplate::Cluster(template),
        }
    }
}

impl PlacementBuilder for PicodataPlacementBuilder<'_> {
    fn plan(&self) -> PlacementResult<ItemSet> {
        match self.template {
            PicodataTemplate::Instance(t) => plan_instance(t),
            PicodataTemplate::Cluster(t) => plan_cluster(t),
        }
    }

    fn wire(&self, items: &mut [PlacementItem]) -> PlacementResult<String> {
        wire(items)
    }
}

// ── Plan ───────────────────────────────────────────────────────────

fn picodata_container(item: &str, node_index: u32, settings: &PicodataSettings, monitor: bool) -> Container {
    Container::new(
        format!("{item}-container"),
        IMAGE_PICODATA,
        ContainerRuntime::Picodata {
            node_index,
            settings: settings.clone(),
        },
    )
    .with_port("pg", PORT_PICODATA_PG)
    .with_port("iproto", PORT_PICODATA_IPROTO)
    .with_volume(format!("{item}-data"), PICODATA_DATA)
    .monitored(monitor)
}

fn plan_instance(t: &PicodataInstanceTemplate) -> PlacementResult<ItemSet> {
    let name = node_item(0);
    let mut items = ItemSet::new();
    let item = items.ensure(&name, t.hardware.as_ref())?;
    item.containers
        .push(picodata_container(&name, 0, &t.settings, false));

    let mut backups = 0;
    for sidecar in &t.sidecars {
        match sidecar {
            PicodataSidecar::NodeExporter { port } => {
                if item.container(&format!("node-exporter-{name}")).is_some() {
                    return Err(invalid("duplicate node exporter sidecar"));
                }
                item.containers.push(node_exporter(&name, *port));
            }
            PicodataSidecar::HttpMetrics { port } => {
                let port = port.unwrap_or(PORT_PICODATA_HTTP);
                for c in &mut item.containers {
                    if matches!(c.runtime, ContainerRuntime::Picodata { .. }) {
                        c.monitor = true;
                        c.set_env(HTTP_LISTEN_ENV, format!("0.0.0.0:{port}"));
                    }
                }
            }
            PicodataSidecar::Backup(config) => {
                backups += 1;
                item.containers.push(backup_agent(
                    format!("picodata-backup-{backups}"),
                    IMAGE_PICODATA,
                    config,
                ));
            }
        }
    }
    Ok(items)
}

fn plan_cluster(t: &PicodataClusterTemplate) -> PlacementResult<ItemSet> {
    let topology = t
        .topology
        .as_ref()
        .ok_or_else(|| invalid("picodata cluster topology is required"))?;
    if topology.nodes_count == 0 {
        return Err(invalid("picodata cluster needs at least one node"));
    }
    validate_overrides(
        "node",
        t.node_overrides.iter().map(|o| o.node_index),
        topology.nodes_count,
    )?;

    let mut items = ItemSet::new();
    let mut nodes = Vec::with_capacity(topology.nodes_count as usize);
    for index in 0..topology.nodes_count {
        let name = node_item(index);
        let over = t.node_overrides.iter().find(|o| o.node_index == index);
        let hardware = over
            .and_then(|o| o.hardware.as_ref())
            .or(topology.node_hardware.as_ref());
        let settings = over
            .and_then(|o| o.settings.as_ref())
            .unwrap_or(&topology.settings);

        let item = items.ensure(&name, hardware)?;
        item.containers
            .push(picodata_container(&name, index, settings, topology.monitor));
        if topology.monitor {
            item.containers.push(node_exporter(&name, None));
        }
        nodes.push(name);
    }

    if let Some(backup) = t.addons.backup.as_ref().filter(|b| b.enabled) {
        plan_backup(&mut items, backup, &nodes)?;
    }

    debug!(items = items.len(), "picodata cluster planned");
    Ok(items)
}

fn plan_backup(items: &mut ItemSet, backup: &PicodataBackupAddon, nodes: &[String]) -> PlacementResult<()> {
    let config = backup
        .config
        .as_ref()
        .ok_or_else(|| invalid("backup addon is enabled but has no config"))?;
    let targets = match backup.scope {
        None => return Err(invalid("backup addon is enabled but has no scope")),
        Some(PicodataScope::AllNodes) => nodes.to_vec(),
        Some(PicodataScope::Node) => {
            let index = backup
                .node_index
                .ok_or_else(|| invalid("backup is scoped to one node but no node_index is set"))?;
            let name = nodes.get(index as usize).ok_or_else(|| {
                invalid(format!(
                    "backup node_index {index} is out of range for {} nodes",
                    nodes.len()
                ))
            })?;
            vec![name.clone()]
        }
    };
    for (i, target) in targets.iter().enumerate() {
        let item = items
            .get_mut(target)
            .ok_or_else(|| invalid(format!("backup target {target:?} does not exist")))?;
        item.containers.push(backup_agent(
            format!("picodata-backup-{}", i + 1),
            IMAGE_PICODATA,
            config,
        ));
    }
    Ok(())
}

// ── Wire ───────────────────────────────────────────────────────────

fn wire(items: &mut [PlacementItem]) -> PlacementResult<String> {
    let mut node_ips = Vec::new();
    for item in items.iter() {
        if item
            .containers
            .iter()
            .any(|c| matches!(c.runtime, ContainerRuntime::Picodata { .. }))
        {
            node_ips.push(bound_ip(item)?);
        }
    }
    let first = *node_ips
        .first()
        .ok_or_else(|| invalid("picodata node not found in placement items"))?;
    let peers = node_ips
        .iter()
        .map(|ip| format!("{ip}:{PORT_PICODATA_IPROTO}"))
        .collect::<Vec<_>>()
        .join(",");

    for item in items.iter_mut() {
        let ip = bound_ip(item)?;
        let item_name = item.name.clone();
        for c in &mut item.containers {
            match c.runtime.clone() {
                ContainerRuntime::Picodata { settings, .. } => {
                    let conf = settings.picodata_conf;
                    c.set_env("PICODATA_INSTANCE_NAME", item_name.as_str());
                    c.set_env("PICODATA_PEER", peers.as_str());
                    c.set_env("PICODATA_ADVERTISE", format!("{ip}:{PORT_PICODATA_IPROTO}"));
                    c.set_env("PICODATA_PG_LISTEN", format!("0.0.0.0:{PORT_PICODATA_PG}"));
                    if !conf.is_empty() {
                        let encoded = serde_json::to_string(&conf).map_err(|e| {
                            invalid(format!("encode picodata_conf for {:?}: {e}", c.name))
                        })?;
                        c.set_env("PICODATA_CONF_JSON", encoded);
                        c.args.extend(conf_args("--set", &conf));
                    }
                    if c.monitor {
                        wire_http_metrics(c);
                    }
                }
                ContainerRuntime::Backup { .. } => {
                    c.set_env("PICODATA_HOST", ip.to_string());
                    c.set_env("PGPORT", PORT_PICODATA_PG.to_string());
                }
                _ => {}
            }
        }
    }

    Ok(format!(
        "postgres://{DEFAULT_POSTGRES_USER}:{DEFAULT_POSTGRES_PASSWORD}@{first}:{PORT_PICODATA_PG}/{DEFAULT_POSTGRES_DATABASE}?sslmode=disable"
    ))
}

/// Expose the built-in metrics endpoint. A listen address set by an
/// `http_metrics` sidecar wins over the default.
fn wire_http_metrics(c: &mut Container) {
    let listen = c
        .env
        .entry(HTTP_LISTEN_ENV.to_string())
        .or_insert_with(|| format!("0.0.0.0:{PORT_PICODATA_HTTP}"))
        .clone();
    let port = listen
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(PORT_PICODATA_HTTP);
    c.args.push("--http-listen".to_string());
    c.args.push(listen);
    if !c.ports.iter().any(|p| p.name == "http-metrics") {
        c.ports.push(ContainerPort {
            name: "http-metrics".to_string(),
            container_port: port,
        });
    }
}
