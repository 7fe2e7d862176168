//! QuotaLedger — per-(scope, kind) counters of remaining capacity.
//!
//! Each counter starts at its configured maximum (created only if absent)
//! and moves through `reserve` and `free`. A reservation over several keys
//! either decrements all of them or none.

use std::sync::Arc;

use bench_core::{Quota, QuotaKind, QuotaLimit, Target, quota_key};
use tracing::{debug, info, warn};

use crate::error::{StateError, StateResult};
use crate::store::KvStore;

#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn KvStore>,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Create every counter that does not exist yet. Existing counters keep their value.
    pub fn init(&self, limits: &[QuotaLimit]) -> StateResult<()> {
        for limit in limits {
            let key = quota_key(limit.scope, limit.kind);
            if self.store.counter_init(&key, limit.maximum)? {
                info!(%key, maximum = limit.maximum, "quota counter created");
            }
        }
        Ok(())
    }

    /// Remaining capacity of one counter, if it exists.
    pub fn available(&self, scope: Target, kind: QuotaKind) -> StateResult<Option<i64>> {
        self.store.counter_get(&quota_key(scope, kind))
    }

    /// Reserve every quota or none. Fails naming the first insufficient one.
    pub fn reserve(&self, quotas: &[Quota]) -> StateResult<()> {
        if quotas.is_empty() {
            return Ok(());
        }
        let requests = requests(quotas);
        match self.store.reserve_counters(&requests)? {
            None => {
                debug!(count = quotas.len(), "quotas reserved");
                Ok(())
            }
            Some(index) => {
                let q = &quotas[index];
                warn!(scope = %q.scope, kind = %q.kind, amount = q.amount, "quota exhausted");
                Err(StateError::QuotaUnavailable {
                    scope: q.scope,
                    kind: q.kind,
                })
            }
        }
    }

    /// Return previously reserved quotas.
    pub fn free(&self, quotas: &[Quota]) -> StateResult<()> {
        if quotas.is_empty() {
            return Ok(());
        }
        self.store.increment_counters(&requests(quotas))?;
        debug!(count = quotas.len(), "quotas freed");
        Ok(())
    }
}

fn requests(quotas: &[Quota]) -> Vec<(String, i64)> {
    quotas.iter().map(|q| (q.key(), q.amount)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StateStore;

    fn test_ledger(limits: &[(QuotaKind, i64)]) -> QuotaLedger {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let ledger = QuotaLedger::new(store);
        let limits: Vec<QuotaLimit> = limits
            .iter()
            .map(|(kind, maximum)| QuotaLimit {
                scope: Target::YandexCloud,
                kind: *kind,
                maximum: *maximum,
            })
            .collect();
        ledger.init(&limits).unwrap();
        ledger
    }

    fn vm(amount: i64) -> Quota {
        Quota::new(Target::YandexCloud, QuotaKind::Vm, amount)
    }

    fn subnet(amount: i64) -> Quota {
        Quota::new(Target::YandexCloud, QuotaKind::Subnet, amount)
    }

    #[test]
    fn vm_quota_exhausts_and_recovers() {
        let ledger = test_ledger(&[(QuotaKind::Vm, 2)]);
        ledger.reserve(&[vm(1)]).unwrap();
        ledger.reserve(&[vm(1)]).unwrap();

        let err = ledger.reserve(&[vm(1)]).unwrap_err();
        assert!(matches!(
            err,
            StateError::QuotaUnavailable { kind: QuotaKind::Vm, .. }
        ));
        assert!(err.to_string().contains("VM"));

        ledger.free(&[vm(1)]).unwrap();
        ledger.reserve(&[vm(1)]).unwrap();
        assert_eq!(ledger.available(Target::YandexCloud, QuotaKind::Vm).unwrap(), Some(0));
    }

    #[test]
    fn mixed_reservation_changes_nothing() {
        let ledger = test_ledger(&[(QuotaKind::Vm, 10), (QuotaKind::Subnet, 0)]);
        let err = ledger.reserve(&[vm(3), subnet(1)]).unwrap_err();
        assert!(matches!(
            err,
            StateError::QuotaUnavailable { kind: QuotaKind::Subnet, .. }
        ));
        assert_eq!(ledger.available(Target::YandexCloud, QuotaKind::Vm).unwrap(), Some(10));
        assert_eq!(ledger.available(Target::YandexCloud, QuotaKind::Subnet).unwrap(), Some(0));

        ledger.reserve(&[vm(3)]).unwrap();
        assert_eq!(ledger.available(Target::YandexCloud, QuotaKind::Vm).unwrap(), Some(7));
    }

    #[test]
    fn repeated_key_counts_every_occurrence() {
        let ledger = test_ledger(&[(QuotaKind::Vm, 2)]);
        let err = ledger.reserve(&[vm(2), vm(2)]).unwrap_err();
        assert!(matches!(
            err,
            StateError::QuotaUnavailable { kind: QuotaKind::Vm, .. }
        ));
        assert_eq!(ledger.available(Target::YandexCloud, QuotaKind::Vm).unwrap(), Some(2));

        ledger.reserve(&[vm(1), vm(1)]).unwrap();
        assert_eq!(ledger.available(Target::YandexCloud, QuotaKind::Vm).unwrap(), Some(0));
        ledger.free(&[vm(1), vm(1)]).unwrap();
        assert_eq!(ledger.available(Target::YandexCloud, QuotaKind::Vm).unwrap(), Some(2));
    }

    #[test]
    fn init_keeps_live_counter() {
        let ledger = test_ledger(&[(QuotaKind::Vm, 5)]);
        ledger.reserve(&[vm(2)]).unwrap();
        ledger
            .init(&[QuotaLimit {
                scope: Target::YandexCloud,
                kind: QuotaKind::Vm,
                maximum: 5,
            }])
            .unwrap();
        assert_eq!(ledger.available(Target::YandexCloud, QuotaKind::Vm).unwrap(), Some(3));
    }

    #[test]
    fn unknown_quota_is_unavailable() {
        let ledger = test_ledger(&[]);
        let err = ledger
            .reserve(&[Quota::new(Target::Docker, QuotaKind::PublicIpAddress, 1)])
            .unwrap_err();
        assert_eq!(err.to_string(), "quota docker:PUBLIC_IP_ADDRESS is not available");
    }

    #[test]
    fn empty_lists_are_noops() {
        let ledger = test_ledger(&[]);
        ledger.reserve(&[]).unwrap();
        ledger.free(&[]).unwrap();
    }

    #[test]
    fn concurrent_reservations_never_oversubscribe() {
        let ledger = test_ledger(&[(QuotaKind::Vm, 5)]);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || ledger.reserve(&[vm(1)]).is_ok())
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(granted, 5);
        assert_eq!(ledger.available(Target::YandexCloud, QuotaKind::Vm).unwrap(), Some(0));
    }
}
