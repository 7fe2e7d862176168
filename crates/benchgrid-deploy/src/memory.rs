//! In-process resource backend.
//!
//! Resources become ready after a configurable number of observations.
//! Failures can be injected per operation. Used by tests and dry runs.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{DeployError, DeployResult};
use crate::reconciler::{Observation, ResourceBackend};
use crate::service::DeployFuture;
use crate::types::Resource;

#[derive(Debug, Default)]
struct MemoryState {
    /// Live resources by id, with how many times each was observed.
    observations: HashMap<String, u32>,
    /// Creates left before `create_resource` starts failing.
    creates_before_failure: Option<u32>,
    failing_observes: u32,
    failing_deletes: u32,
    deleted: Vec<String>,
}

#[derive(Debug)]
pub struct MemoryBackend {
    ready_after: u32,
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Resources report ready on their `ready_after`-th observation.
    pub fn new(ready_after: u32) -> Self {
        Self {
            ready_after,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn never_ready() -> Self {
        Self::new(u32::MAX)
    }

    /// Let `n` more creates succeed, then fail every later one.
    pub async fn fail_creates_after(&self, n: u32) {
        self.state.lock().await.creates_before_failure = Some(n);
    }

    pub async fn fail_observes(&self, n: u32) {
        self.state.lock().await.failing_observes = n;
    }

    pub async fn fail_deletes(&self, n: u32) {
        self.state.lock().await.failing_deletes = n;
    }

    /// Drop a resource as if it disappeared outside our control.
    pub async fn forget(&self, id: &str) {
        self.state.lock().await.observations.remove(id);
    }

    pub async fn live(&self) -> usize {
        self.state.lock().await.observations.len()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.state.lock().await.observations.contains_key(id)
    }

    /// Ids of successfully deleted resources, in delete order.
    pub async fn deleted(&self) -> Vec<String> {
        self.state.lock().await.deleted.clone()
    }
}

impl ResourceBackend for MemoryBackend {
    fn create_resource<'a>(&'a self, resource: &'a Resource) -> DeployFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if let Some(left) = state.creates_before_failure.as_mut() {
                if *left == 0 {
                    return Err(DeployError::Backend(format!(
                        "injected create failure for {}",
                        resource.name
                    )));
                }
                *left -= 1;
            }
            state.observations.insert(resource.id.clone(), 0);
            debug!(id = %resource.id, name = %resource.name, "memory resource created");
            Ok(())
        })
    }

    fn observe<'a>(&'a self, resource: &'a Resource) -> DeployFuture<'a, Observation> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.failing_observes > 0 {
                state.failing_observes -= 1;
                return Err(DeployError::Backend(format!(
                    "injected observe failure for {}",
                    resource.name
                )));
            }
            let seen = state
                .observations
                .get_mut(&resource.id)
                .ok_or_else(|| DeployError::NotFound(resource.id.clone()))?;
            *seen = seen.saturating_add(1);
            let ready = *seen >= self.ready_after;
            Ok(Observation {
                ready,
                synced: ready,
                external_id: Some(format!("mem-{}", resource.id)),
            })
        })
    }

    fn delete_resource<'a>(&'a self, resource: &'a Resource) -> DeployFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.failing_deletes > 0 {
                state.failing_deletes -= 1;
                return Err(DeployError::Backend(format!(
                    "injected delete failure for {}",
                    resource.name
                )));
            }
            if state.observations.remove(&resource.id).is_none() {
                return Err(DeployError::NotFound(resource.id.clone()));
            }
            state.deleted.push(resource.id.clone());
            debug!(id = %resource.id, name = %resource.name, "memory resource deleted");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_after_observations() {
        let backend = MemoryBackend::new(2);
        let r = Resource::creating("r1", "vm");
        backend.create_resource(&r).await.unwrap();
        assert!(!backend.observe(&r).await.unwrap().ready);
        assert!(backend.observe(&r).await.unwrap().ready);
    }

    #[tokio::test]
    async fn unknown_resource_is_not_found() {
        let backend = MemoryBackend::new(1);
        let r = Resource::creating("ghost", "vm");
        assert!(matches!(backend.observe(&r).await, Err(DeployError::NotFound(_))));
        assert!(matches!(
            backend.delete_resource(&r).await,
            Err(DeployError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn injected_delete_failures_run_out() {
        let backend = MemoryBackend::new(1);
        let r = Resource::creating("r1", "vm");
        backend.create_resource(&r).await.unwrap();
        backend.fail_deletes(1).await;
        assert!(backend.delete_resource(&r).await.is_err());
        backend.delete_resource(&r).await.unwrap();
        assert_eq!(backend.deleted().await, vec!["r1".to_string()]);
        assert!(!backend.contains("r1").await);
    }
}
