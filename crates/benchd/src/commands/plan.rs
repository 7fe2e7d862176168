//! `benchd plan` — expand a template without reserving anything.

use std::path::Path;

use bench_core::{BenchConfig, Identifier, Network, Target};
use benchgrid_network::SubnetAllocator;
use benchgrid_placement::{DatabaseTemplate, PlacementIntent, plan_placement_intent, required_address_count};
use tracing::info;

use super::{print_json, read_toml};

pub fn plan(config: &BenchConfig, template: &Path, target: Target) -> anyhow::Result<()> {
    let template: DatabaseTemplate = read_toml(template)?;
    let intent = plan_template(config, &template, target)?;
    info!(
        items = intent.items.len(),
        cidr = %intent.network.cidr,
        "placement planned"
    );
    print_json(&intent)
}

/// Expand `template` onto the first subnet of the target's pool, ignoring reservations.
pub(crate) fn plan_template(
    config: &BenchConfig,
    template: &DatabaseTemplate,
    target: Target,
) -> anyhow::Result<PlacementIntent> {
    let range = config.network.range_for(target);
    // One extra address for the load generator.
    let count = required_address_count(template) + 1;
    let allocation = SubnetAllocator::new(config.allocator.padding).next_subnet_with_ips(
        &range.base_cidr,
        range.prefix,
        &[],
        count,
    )?;
    let network = Network {
        identifier: Identifier::new(&range.name, target),
        cidr: allocation.subnet.to_string(),
        ips: allocation.ips,
    };
    Ok(plan_placement_intent(template, &network)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_plans_onto_first_subnet() {
        let template: DatabaseTemplate = toml::from_str(
            r#"
kind = "postgres_instance"
hardware = { cores = 2, memory_gb = 4, disk_gb = 20 }
"#,
        )
        .unwrap();
        let intent = plan_template(&BenchConfig::default(), &template, Target::Docker).unwrap();
        assert_eq!(intent.network.cidr, "172.28.0.0/24");
        assert_eq!(intent.items.len(), 1);
        assert_eq!(intent.items[0].name, "postgres-master");
        assert!(intent.connection_string.contains("172.28.0.4:5432"));
    }
}
