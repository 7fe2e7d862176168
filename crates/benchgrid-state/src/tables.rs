//! redb table definitions for the benchgrid state store.
//!
//! All tables use `&str` keys. Sets and leases are JSON-serialized into
//! `&[u8]` value columns; counters are stored natively.

use redb::TableDefinition;

/// Plain string values.
pub const STRINGS: TableDefinition<&str, &str> = TableDefinition::new("strings");

/// String sets as a JSON array of sorted members.
pub const SETS: TableDefinition<&str, &[u8]> = TableDefinition::new("sets");

/// Integer counters keyed by `{scope}:{kind}`.
pub const COUNTERS: TableDefinition<&str, i64> = TableDefinition::new("counters");

/// Lock leases keyed by `{prefix}{lock name}`.
pub const LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");
