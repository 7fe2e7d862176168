//! Address count a template needs before any network is reserved.

use crate::template::{AddonPlacement, DatabaseTemplate, PostgresClusterTemplate};

/// Number of placement items `template` expands to.
///
/// Matches what the builders create: topology nodes plus dedicated addon
/// items. Colocated addons add nothing. Does not include the load
/// generator; callers add that themselves.
pub fn required_address_count(template: &DatabaseTemplate) -> usize {
    match template {
        DatabaseTemplate::PostgresInstance(_) | DatabaseTemplate::PicodataInstance(_) => 1,
        DatabaseTemplate::PostgresCluster(t) => postgres_cluster_count(t),
        DatabaseTemplate::PicodataCluster(t) => t
            .topology
            .as_ref()
            .map_or(0, |topology| topology.nodes_count as usize),
    }
}

fn postgres_cluster_count(t: &PostgresClusterTemplate) -> usize {
    let Some(topology) = &t.topology else {
        return 0;
    };
    let etcd = t
        .addons
        .etcd
        .as_ref()
        .map_or(0, |etcd| dedicated_count(etcd.placement.as_ref()));
    let pgbouncer = t
        .addons
        .pgbouncer
        .as_ref()
        .filter(|p| p.enabled)
        .map_or(0, |p| dedicated_count(p.placement.as_ref()));
    1 + topology.replicas_count as usize + etcd + pgbouncer
}

fn dedicated_count(placement: Option<&AddonPlacement>) -> usize {
    match placement {
        Some(AddonPlacement::Dedicated {
            instances_count, ..
        }) => *instances_count as usize,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> DatabaseTemplate {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn instances_need_one() {
        assert_eq!(required_address_count(&parse(r#"kind = "postgres_instance""#)), 1);
        assert_eq!(required_address_count(&parse(r#"kind = "picodata_instance""#)), 1);
    }

    #[test]
    fn cluster_counts_dedicated_addons() {
        let t = parse(
            r#"
kind = "postgres_cluster"
[topology]
replicas_count = 2
[addons.etcd]
placement = { mode = "dedicated", instances_count = 3 }
[addons.pgbouncer]
enabled = true
placement = { mode = "colocate", scope = "master" }
"#,
        );
        assert_eq!(required_address_count(&t), 6);
    }

    #[test]
    fn disabled_pooler_is_not_counted() {
        let t = parse(
            r#"
kind = "postgres_cluster"
[topology]
replicas_count = 1
[addons.pgbouncer]
enabled = false
placement = { mode = "dedicated", instances_count = 2 }
"#,
        );
        assert_eq!(required_address_count(&t), 2);
    }

    #[test]
    fn picodata_cluster_counts_nodes() {
        let t = parse(
            r#"
kind = "picodata_cluster"
[topology]
nodes_count = 4
"#,
        );
        assert_eq!(required_address_count(&t), 4);
    }
}
