//! `benchd quota` — inspect and move quota counters.

use std::sync::Arc;

use bench_core::{BenchConfig, Quota, QuotaKind, Target};
use benchgrid_state::{KvStore, QuotaLedger};
use serde::Serialize;
use tracing::info;

use super::{open_store, print_json};

#[derive(Debug, Serialize)]
pub(crate) struct QuotaRow {
    pub scope: Target,
    pub kind: QuotaKind,
    pub maximum: i64,
    pub available: Option<i64>,
}

/// Seed counters for configured limits that have never been set.
fn ledger(config: &BenchConfig, store: Arc<dyn KvStore>) -> anyhow::Result<QuotaLedger> {
    let ledger = QuotaLedger::new(store);
    ledger.init(&config.quotas.to_limits())?;
    Ok(ledger)
}

pub fn show(config: &BenchConfig) -> anyhow::Result<()> {
    print_json(&rows(config, open_store(config)?)?)
}

pub fn reserve(config: &BenchConfig, target: Target, kind: QuotaKind, amount: i64) -> anyhow::Result<()> {
    ledger(config, open_store(config)?)?.reserve(&[Quota::new(target, kind, amount)])?;
    info!(scope = %target.as_str(), kind = ?kind, amount, "quota reserved");
    Ok(())
}

pub fn free(config: &BenchConfig, target: Target, kind: QuotaKind, amount: i64) -> anyhow::Result<()> {
    ledger(config, open_store(config)?)?.free(&[Quota::new(target, kind, amount)])?;
    info!(scope = %target.as_str(), kind = ?kind, amount, "quota freed");
    Ok(())
}

pub(crate) fn rows(config: &BenchConfig, store: Arc<dyn KvStore>) -> anyhow::Result<Vec<QuotaRow>> {
    let ledger = ledger(config, store)?;
    config
        .quotas
        .to_limits()
        .into_iter()
        .map(|limit| {
            Ok(QuotaRow {
                scope: limit.scope,
                kind: limit.kind,
                maximum: limit.maximum,
                available: ledger.available(limit.scope, limit.kind)?,
            })
        })
        .collect()
}
