//! Deployment backends by target, built once per process.

use std::collections::HashMap;
use std::sync::Arc;

use bench_core::Target;

use crate::error::{DeployError, DeployResult};
use crate::service::DeploymentService;

#[derive(Clone, Default)]
pub struct DeploymentRegistry {
    services: HashMap<Target, Arc<dyn DeploymentService>>,
}

impl DeploymentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the backend for `target`, replacing any previous one.
    pub fn register(&mut self, target: Target, service: Arc<dyn DeploymentService>) -> &mut Self {
        self.services.insert(target, service);
        self
    }

    pub fn get(&self, target: Target) -> DeployResult<Arc<dyn DeploymentService>> {
        self.services
            .get(&target)
            .cloned()
            .ok_or(DeployError::UnsupportedTarget(target))
    }

    pub fn targets(&self) -> Vec<Target> {
        let mut targets: Vec<_> = self.services.keys().copied().collect();
        targets.sort();
        targets
    }
}
