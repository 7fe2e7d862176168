//! StateStore — redb-backed implementation of the shared key-value contract.
//!
//! Provides strings, string sets, integer counters with atomic multi-key
//! check-then-decrement, and expiring lock leases. The store supports both
//! on-disk and in-memory backends (the latter for testing).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bench_core::epoch_millis as now_ms;
use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Key-value operations the coordination layer relies on.
///
/// `reserve_counters`, `increment_counters` and the lease calls must each be
/// atomic across all keys they touch.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> StateResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StateResult<()>;

    /// Remove a string key. Returns true if it existed.
    fn delete(&self, key: &str) -> StateResult<bool>;

    /// Add members to a set, returning how many were not already present.
    fn set_add(&self, key: &str, members: &[String]) -> StateResult<usize>;

    /// Remove members from a set, returning how many were present.
    fn set_remove(&self, key: &str, members: &[String]) -> StateResult<usize>;

    fn set_members(&self, key: &str) -> StateResult<Vec<String>>;

    /// Create a counter with `value` unless it already exists. Returns true if created.
    fn counter_init(&self, key: &str, value: i64) -> StateResult<bool>;

    fn counter_get(&self, key: &str) -> StateResult<Option<i64>>;

    /// Decrement every `(key, amount)` if all have enough headroom.
    ///
    /// Returns `Some(i)` with the index of the first insufficient key and
    /// leaves every counter untouched, or `None` once all were decremented.
    /// A missing counter has no headroom.
    fn reserve_counters(&self, requests: &[(String, i64)]) -> StateResult<Option<usize>>;

    /// Increment every `(key, amount)`. Missing counters start at zero.
    fn increment_counters(&self, requests: &[(String, i64)]) -> StateResult<()>;

    /// Take the lease on `key` if it is free or expired.
    fn lease_acquire(&self, key: &str, holder: &str, ttl: Duration) -> StateResult<bool>;

    /// Push the expiry of a lease still owned by `holder`. False if ownership was lost.
    fn lease_extend(&self, key: &str, holder: &str, ttl: Duration) -> StateResult<bool>;

    /// Drop a lease owned by `holder`. False if it was not held by them.
    fn lease_release(&self, key: &str, holder: &str) -> StateResult<bool>;

    fn lease_get(&self, key: &str) -> StateResult<Option<Lease>>;
}

/// A time-boxed claim on a lock key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: String,
    pub acquired_at_ms: u64,
    pub expires_at_ms: u64,
}

impl Lease {
    fn new(holder: &str, ttl: Duration) -> Self {
        let now = now_ms();
        Self {
            holder: holder.to_string(),
            acquired_at_ms: now,
            expires_at_ms: now + ttl.as_millis() as u64,
        }
    }

    pub fn is_expired(&self) -> bool {
        now_ms() >= self.expires_at_ms
    }
}

/// Thread-safe key-value store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing and dry runs).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(STRINGS).map_err(map_err!(Table))?;
        txn.open_table(SETS).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.open_table(LEASES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Read-modify-write one set inside a single write transaction.
    fn update_set<F>(&self, key: &str, f: F) -> StateResult<usize>
    where
        F: FnOnce(&mut BTreeSet<String>) -> usize,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let changed;
        {
            let mut table = txn.open_table(SETS).map_err(map_err!(Table))?;
            let mut members: BTreeSet<String> = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => BTreeSet::new(),
            };
            changed = f(&mut members);
            if members.is_empty() {
                table.remove(key).map_err(map_err!(Write))?;
            } else {
                let value = serde_json::to_vec(&members).map_err(map_err!(Serialize))?;
                table
                    .insert(key, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(changed)
    }

    fn read_lease(table: &impl ReadableTable<&'static str, &'static [u8]>, key: &str) -> StateResult<Option<Lease>> {
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let lease: Lease =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(lease))
            }
            None => Ok(None),
        }
    }
}

impl KvStore for StateStore {
    // ── Strings ────────────────────────────────────────────────────

    fn get(&self, key: &str) -> StateResult<Option<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STRINGS).map_err(map_err!(Table))?;
        Ok(table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_string()))
    }

    fn set(&self, key: &str, value: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(STRINGS).map_err(map_err!(Table))?;
            table.insert(key, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(STRINGS).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Sets ───────────────────────────────────────────────────────

    fn set_add(&self, key: &str, members: &[String]) -> StateResult<usize> {
        let added = self.update_set(key, |set| {
            members.iter().filter(|m| set.insert((*m).clone())).count()
        })?;
        debug!(%key, added, "set members added");
        Ok(added)
    }

    fn set_remove(&self, key: &str, members: &[String]) -> StateResult<usize> {
        let removed = self.update_set(key, |set| members.iter().filter(|m| set.remove(*m)).count())?;
        debug!(%key, removed, "set members removed");
        Ok(removed)
    }

    fn set_members(&self, key: &str) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SETS).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let members: Vec<String> =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(members)
            }
            None => Ok(Vec::new()),
        }
    }

    // ── Counters ───────────────────────────────────────────────────

    fn counter_init(&self, key: &str, value: i64) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let created;
        {
            let mut table = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            let exists = table.get(key).map_err(map_err!(Read))?.is_some();
            created = !exists;
            if created {
                table.insert(key, value).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(created)
    }

    fn counter_get(&self, key: &str) -> StateResult<Option<i64>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        Ok(table.get(key).map_err(map_err!(Read))?.map(|g| g.value()))
    }

    fn reserve_counters(&self, requests: &[(String, i64)]) -> StateResult<Option<usize>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            // Running value per key; repeated keys draw from the same headroom.
            let mut remaining: BTreeMap<&str, i64> = BTreeMap::new();
            for (i, (key, amount)) in requests.iter().enumerate() {
                let available = match remaining.get(key.as_str()) {
                    Some(value) => *value,
                    None => table
                        .get(key.as_str())
                        .map_err(map_err!(Read))?
                        .map(|g| g.value())
                        .unwrap_or(0),
                };
                if available < *amount {
                    // Dropping the transaction aborts it; nothing was written.
                    return Ok(Some(i));
                }
                remaining.insert(key.as_str(), available - amount);
            }
            for (key, value) in remaining {
                table.insert(key, value).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(None)
    }

    fn increment_counters(&self, requests: &[(String, i64)]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            for (key, amount) in requests {
                let current = table
                    .get(key.as_str())
                    .map_err(map_err!(Read))?
                    .map(|g| g.value())
                    .unwrap_or(0);
                table
                    .insert(key.as_str(), current + amount)
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Leases ─────────────────────────────────────────────────────

    fn lease_acquire(&self, key: &str, holder: &str, ttl: Duration) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            if let Some(existing) = Self::read_lease(&table, key)? {
                if !existing.is_expired() && existing.holder != holder {
                    return Ok(false);
                }
            }
            let value = serde_json::to_vec(&Lease::new(holder, ttl)).map_err(map_err!(Serialize))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(true)
    }

    fn lease_extend(&self, key: &str, holder: &str, ttl: Duration) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            let Some(mut lease) = Self::read_lease(&table, key)? else {
                return Ok(false);
            };
            if lease.holder != holder || lease.is_expired() {
                return Ok(false);
            }
            lease.expires_at_ms = now_ms() + ttl.as_millis() as u64;
            let value = serde_json::to_vec(&lease).map_err(map_err!(Serialize))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(true)
    }

    fn lease_release(&self, key: &str, holder: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            match Self::read_lease(&table, key)? {
                Some(lease) if lease.holder == holder => {
                    table.remove(key).map_err(map_err!(Write))?;
                }
                _ => return Ok(false),
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(true)
    }

    fn lease_get(&self, key: &str) -> StateResult<Option<Lease>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEASES).map_err(map_err!(Table))?;
        Self::read_lease(&table, key)
    }
}
