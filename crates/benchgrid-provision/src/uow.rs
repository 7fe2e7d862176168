//! Unit of work — compensations for partially acquired resources.
//!
//! Every successful acquisition registers a compensating action. On
//! failure, [`UnitOfWork::rollback`] runs them newest first, keeps going
//! when one fails and reports all failures together with the original
//! error. [`UnitOfWork::commit`] discards them once the run owns its
//! resources.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info, warn};

use crate::error::{ProvisionError, ProvisionResult};

type CompensationFuture = Pin<Box<dyn Future<Output = ProvisionResult<()>> + Send>>;
type Compensation = Box<dyn FnOnce() -> CompensationFuture + Send>;

#[derive(Default)]
pub struct UnitOfWork {
    steps: Vec<(String, Compensation)>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the action that undoes the step just completed.
    pub fn register<F, Fut>(&mut self, name: &str, compensate: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ProvisionResult<()>> + Send + 'static,
    {
        debug!(step = name, "compensation registered");
        self.steps
            .push((name.to_string(), Box::new(move || Box::pin(compensate()))));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn commit(mut self) {
        debug!(discarded = self.steps.len(), "unit of work committed");
        self.steps.clear();
    }

    /// Undo every registered step in reverse order and return the error to report.
    pub async fn rollback(mut self, primary: ProvisionError) -> ProvisionError {
        warn!(error = %primary, steps = self.steps.len(), "rolling back");
        let mut cleanup = Vec::new();
        while let Some((name, compensate)) = self.steps.pop() {
            match compensate().await {
                Ok(()) => info!(step = %name, "compensation applied"),
                Err(e) => {
                    warn!(step = %name, error = %e, "compensation failed");
                    cleanup.push(e);
                }
            }
        }
        if cleanup.is_empty() {
            primary
        } else {
            ProvisionError::Compensation {
                primary: Box::new(primary),
                cleanup,
            }
        }
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.steps.is_empty() {
            warn!(
                pending = self.steps.len(),
                "unit of work dropped without commit or rollback"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record(log: &Arc<Mutex<Vec<String>>>, name: &'static str, fail: bool) -> impl FnOnce() -> CompensationFuture + Send + 'static {
        let log = log.clone();
        move || {
            Box::pin(async move {
                log.lock().unwrap().push(name.to_string());
                if fail {
                    Err(ProvisionError::Config(format!("{name} undo failed")))
                } else {
                    Ok(())
                }
            })
        }
    }

    #[tokio::test]
    async fn rollback_runs_in_reverse_order() {
        let log = recorder();
        let mut uow = UnitOfWork::new();
        uow.register("quotas", record(&log, "quotas", false));
        uow.register("network", record(&log, "network", false));
        uow.register("deployment", record(&log, "deployment", false));

        let err = uow.rollback(ProvisionError::Config("primary".into())).await;
        assert!(matches!(err, ProvisionError::Config(_)));
        assert_eq!(*log.lock().unwrap(), vec!["deployment", "network", "quotas"]);
    }

    #[tokio::test]
    async fn failing_compensation_does_not_stop_the_rest() {
        let log = recorder();
        let mut uow = UnitOfWork::new();
        uow.register("quotas", record(&log, "quotas", true));
        uow.register("network", record(&log, "network", true));

        let err = uow.rollback(ProvisionError::VmNotFound("vm-1".into())).await;
        assert_eq!(*log.lock().unwrap(), vec!["network", "quotas"]);
        match err {
            ProvisionError::Compensation { primary, cleanup } => {
                assert!(matches!(*primary, ProvisionError::VmNotFound(_)));
                assert_eq!(cleanup.len(), 2);
                assert!(cleanup[0].to_string().contains("network"));
            }
            other => panic!("expected compensation error, got {other}"),
        }
    }

    #[tokio::test]
    async fn commit_discards_compensations() {
        let log = recorder();
        let mut uow = UnitOfWork::new();
        uow.register("quotas", record(&log, "quotas", false));
        assert_eq!(uow.len(), 1);
        uow.commit();
        assert!(log.lock().unwrap().is_empty());
    }
}
