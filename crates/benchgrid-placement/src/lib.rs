//! benchgrid-placement — database topologies to address-bound, wired containers.
//!
//! Building runs in two explicit phases around address binding:
//!
//! ```text
//!  DatabaseTemplate ──plan──▶ ItemSet ──bind(Network)──▶ items with IPs ──wire──▶ PlacementIntent
//!                     (topology + addons,     (ips[i] to the i-th          (peer lists, upstreams,
//!                      dedicated items)        created item)                connection string)
//! ```
//!
//! # Components
//!
//! - **`template`** — declarative Postgres and Picodata templates
//! - **`container`** — container model with a typed runtime per role
//! - **`intent`** — placement items, the `PlacementBuilder` contract, binding
//! - **`postgres`** / **`picodata`** — the two builders
//! - **`ip_count`** — addresses a template needs, computed before reservation

pub mod container;
pub mod error;
pub mod intent;
pub mod ip_count;
pub mod picodata;
pub mod postgres;
pub mod template;

pub use container::{Container, ContainerPort, ContainerRuntime, ExporterKind, PostgresRole, VolumeMount};
pub use error::{PlacementError, PlacementResult};
pub use intent::{ItemSet, PlacementBuilder, PlacementIntent, PlacementItem, build_intent};
pub use ip_count::required_address_count;
pub use picodata::PicodataPlacementBuilder;
pub use postgres::PostgresPlacementBuilder;
pub use template::DatabaseTemplate;

use bench_core::Network;

/// Expand `template` against an already reserved network.
pub fn plan_placement_intent(
    template: &DatabaseTemplate,
    network: &Network,
) -> PlacementResult<PlacementIntent> {
    match template {
        DatabaseTemplate::PostgresInstance(t) => {
            build_intent(&PostgresPlacementBuilder::instance(t), network)
        }
        DatabaseTemplate::PostgresCluster(t) => {
            build_intent(&PostgresPlacementBuilder::cluster(t), network)
        }
        DatabaseTemplate::PicodataInstance(t) => {
            build_intent(&PicodataPlacementBuilder::instance(t), network)
        }
        DatabaseTemplate::PicodataCluster(t) => {
            build_intent(&PicodataPlacementBuilder::cluster(t), network)
        }
    }
}
