//! Concurrent readiness polling.
//!
//! Every deployment gets its own poll loop; a semaphore bounds how many
//! backend calls are in flight at once. Transient backend errors are
//! retried on the next poll. The first permanent failure (a DEGRADED
//! resource or a non-transient error) aborts every sibling loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bench_core::Cancellation;
use bench_core::config::{ReconcileConfig, duration_field};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{DeployError, DeployResult};
use crate::service::DeploymentService;
use crate::types::Deployment;

#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    /// Overall limit for all deployments together.
    pub deadline: Duration,
    pub max_concurrent: usize,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            deadline: Duration::from_secs(30 * 60),
            max_concurrent: 8,
        }
    }
}

impl WaitOptions {
    pub fn from_config(config: &ReconcileConfig) -> anyhow::Result<Self> {
        Ok(Self {
            poll_interval: duration_field("reconcile.poll_interval", &config.poll_interval)?,
            deadline: duration_field("reconcile.wait_deadline", &config.wait_deadline)?,
            max_concurrent: config.max_concurrent_polls.max(1),
        })
    }
}

/// Poll `deployments` until all are ready, returning them in input order.
///
/// Fails with [`DeployError::Timeout`] when the deadline passes and with
/// [`DeployError::Cancelled`] when `cancel` fires; never reports success
/// for a deployment that was not observed ready.
pub async fn wait_until_ready(
    service: Arc<dyn DeploymentService>,
    deployments: Vec<Deployment>,
    options: &WaitOptions,
    cancel: &Cancellation,
) -> DeployResult<Vec<Deployment>> {
    let total = deployments.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let permits = Arc::new(Semaphore::new(options.max_concurrent.max(1)));
    let mut tasks = JoinSet::new();
    for (index, deployment) in deployments.into_iter().enumerate() {
        let service = service.clone();
        let permits = permits.clone();
        let interval = options.poll_interval;
        tasks.spawn(async move {
            poll_until_ready(service, permits, deployment, interval)
                .await
                .map(|d| (index, d))
        });
    }

    let started = Instant::now();
    let mut ready: Vec<Option<Deployment>> = (0..total).map(|_| None).collect();
    let result = {
        let collect = async {
            while let Some(joined) = tasks.join_next().await {
                let (index, deployment) = joined.map_err(|e| DeployError::Join(e.to_string()))??;
                ready[index] = Some(deployment);
            }
            Ok::<(), DeployError>(())
        };
        tokio::select! {
            outcome = tokio::time::timeout(options.deadline, collect) => match outcome {
                Ok(inner) => inner,
                Err(_) => Err(DeployError::Timeout { waited: started.elapsed() }),
            },
            _ = cancel.cancelled() => Err(DeployError::Cancelled("readiness wait".to_string())),
        }
    };

    if let Err(e) = result {
        tasks.abort_all();
        warn!(deployments = total, error = %e, "readiness wait failed");
        return Err(e);
    }

    info!(deployments = total, elapsed_ms = started.elapsed().as_millis() as u64, "deployments ready");
    Ok(ready.into_iter().flatten().collect())
}

async fn poll_until_ready(
    service: Arc<dyn DeploymentService>,
    permits: Arc<Semaphore>,
    mut deployment: Deployment,
    interval: Duration,
) -> DeployResult<Deployment> {
    loop {
        {
            let _permit = permits
                .acquire()
                .await
                .map_err(|e| DeployError::Join(e.to_string()))?;
            match service.process_deployment_status(&mut deployment).await {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    warn!(deployment = %deployment.id(), error = %e, "status poll failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(resource) = deployment.degraded() {
            return Err(DeployError::Degraded {
                deployment: deployment.id().to_string(),
                resource: resource.name.clone(),
            });
        }
        if deployment.is_ready() {
            debug!(deployment = %deployment.id(), "deployment ready");
            return Ok(deployment);
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::memory::MemoryBackend;
    use crate::reconciler::DeploymentReconciler;
    use crate::types::fixtures;

    fn options(deadline: Duration) -> WaitOptions {
        WaitOptions {
            poll_interval: Duration::from_millis(5),
            deadline,
            max_concurrent: 2,
        }
    }

    async fn deploy(
        backend: Arc<MemoryBackend>,
        interval: Duration,
        count: usize,
    ) -> (Arc<dyn DeploymentService>, Vec<Deployment>) {
        let service: Arc<dyn DeploymentService> = Arc::new(DeploymentReconciler::new(backend, interval));
        let mut deployments = Vec::new();
        for _ in 0..count {
            deployments.push(service.create_deployment(&fixtures::template(2)).await.unwrap());
        }
        (service, deployments)
    }

    #[tokio::test]
    async fn all_become_ready_in_input_order() {
        let (service, deployments) = deploy(Arc::new(MemoryBackend::new(3)), Duration::from_secs(600), 4).await;
        let ids: Vec<String> = deployments.iter().map(|d| d.id().to_string()).collect();
        let ready = wait_until_ready(service, deployments, &options(Duration::from_secs(5)), &Cancellation::never())
            .await
            .unwrap();
        assert_eq!(ready.len(), 4);
        assert!(ready.iter().all(Deployment::is_ready));
        let got: Vec<String> = ready.iter().map(|d| d.id().to_string()).collect();
        assert_eq!(got, ids);
    }

    #[tokio::test]
    async fn degraded_resource_fails_fast() {
        let (service, deployments) = deploy(Arc::new(MemoryBackend::never_ready()), Duration::ZERO, 3).await;
        let err = wait_until_ready(service, deployments, &options(Duration::from_secs(5)), &Cancellation::never())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Degraded { .. }));
    }

    #[tokio::test]
    async fn transient_observe_failure_is_retried() {
        let backend = Arc::new(MemoryBackend::new(2));
        let (service, deployments) = deploy(backend.clone(), Duration::from_secs(600), 2).await;
        backend.fail_observes(1).await;
        let ready = wait_until_ready(service, deployments, &options(Duration::from_secs(5)), &Cancellation::never())
            .await
            .unwrap();
        assert_eq!(ready.len(), 2);
        assert!(ready.iter().all(Deployment::is_ready));
    }

    #[tokio::test]
    async fn persistent_observe_failure_ends_in_timeout() {
        let backend = Arc::new(MemoryBackend::new(1));
        let (service, deployments) = deploy(backend.clone(), Duration::from_secs(600), 1).await;
        backend.fail_observes(u32::MAX).await;
        let err = wait_until_ready(service, deployments, &options(Duration::from_millis(40)), &Cancellation::never())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Timeout { .. }));
    }

    #[tokio::test]
    async fn deadline_yields_timeout() {
        let (service, deployments) =
            deploy(Arc::new(MemoryBackend::never_ready()), Duration::from_secs(600), 2).await;
        let err = wait_until_ready(service, deployments, &options(Duration::from_millis(40)), &Cancellation::never())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancellation_is_not_success() {
        let (service, deployments) =
            deploy(Arc::new(MemoryBackend::never_ready()), Duration::from_secs(600), 1).await;
        let (handle, cancel) = Cancellation::pair();
        handle.cancel();
        let err = wait_until_ready(service, deployments, &options(Duration::from_secs(5)), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Cancelled(_)));
    }

    #[tokio::test]
    async fn nothing_to_wait_for() {
        let (service, _) = deploy(Arc::new(MemoryBackend::new(1)), Duration::from_secs(600), 0).await;
        let ready = wait_until_ready(service, Vec::new(), &WaitOptions::default(), &Cancellation::never())
            .await
            .unwrap();
        assert!(ready.is_empty());
    }
}
