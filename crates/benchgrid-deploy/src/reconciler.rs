//! DeploymentReconciler — drives resource statuses from remote observations.
//!
//! Each `process_deployment_status` call observes every resource once and
//! applies at most one transition per resource. Callers poll it until the
//! deployment is ready (see [`crate::wait`]).
//!
//! A resource that sits in CREATING or DESTROYING longer than the reconcile
//! interval becomes DEGRADED. If it was still CREATING, its delete is issued
//! right away so the backend does not keep a half-built resource around.

use std::sync::Arc;
use std::time::Duration;

use bench_core::epoch_millis;
use tracing::{debug, info, warn};

use crate::error::{DeployError, DeployResult};
use crate::service::{DeployFuture, DeploymentService};
use crate::types::{Deployment, DeploymentTemplate, Resource, ResourceStatus};

/// What the backend currently reports for one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub ready: bool,
    pub synced: bool,
    pub external_id: Option<String>,
}

/// Per-resource operations of a concrete backend.
///
/// `observe` and `delete_resource` return [`DeployError::NotFound`] for a
/// resource the backend does not know.
pub trait ResourceBackend: Send + Sync {
    fn create_resource<'a>(&'a self, resource: &'a Resource) -> DeployFuture<'a, ()>;

    fn observe<'a>(&'a self, resource: &'a Resource) -> DeployFuture<'a, Observation>;

    fn delete_resource<'a>(&'a self, resource: &'a Resource) -> DeployFuture<'a, ()>;
}

#[derive(Clone)]
pub struct DeploymentReconciler {
    backend: Arc<dyn ResourceBackend>,
    reconcile_interval: Duration,
}

impl DeploymentReconciler {
    pub fn new(backend: Arc<dyn ResourceBackend>, reconcile_interval: Duration) -> Self {
        Self {
            backend,
            reconcile_interval,
        }
    }

    async fn create(&self, template: &DeploymentTemplate) -> DeployResult<Deployment> {
        let deployment = Deployment::from_template(template);
        let mut created = Vec::new();
        for resource in deployment.resources() {
            if let Err(e) = self.backend.create_resource(resource).await {
                warn!(
                    deployment = %deployment.id(),
                    resource = %resource.name,
                    error = %e,
                    "resource creation failed, removing created resources"
                );
                for done in created.into_iter().rev() {
                    if let Err(cleanup) = self.delete_idempotent(done).await {
                        warn!(resource = %done.name, error = %cleanup, "cleanup delete failed");
                    }
                }
                return Err(e);
            }
            created.push(resource);
        }
        info!(
            deployment = %deployment.id(),
            name = %template.identifier.name,
            vms = deployment.vms.len(),
            "deployment created"
        );
        Ok(deployment)
    }

    async fn process(&self, deployment: &mut Deployment) -> DeployResult<()> {
        let now = epoch_millis();
        let id = deployment.id().to_string();
        let mut first_error = None;
        for resource in deployment.resources_mut() {
            if let Err(e) = self.reconcile(&id, resource, now).await {
                warn!(deployment = %id, resource = %resource.name, error = %e, "reconcile failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn reconcile(&self, deployment: &str, resource: &mut Resource, now_ms: u64) -> DeployResult<()> {
        if resource.status == ResourceStatus::Destroyed {
            return Ok(());
        }

        match self.backend.observe(resource).await {
            Ok(observed) => {
                resource.ready = observed.ready;
                resource.synced = observed.synced;
                if observed.external_id.is_some() {
                    resource.external_id = observed.external_id;
                }
            }
            Err(DeployError::NotFound(_)) => {
                if matches!(
                    resource.status,
                    ResourceStatus::Destroying | ResourceStatus::Degraded
                ) {
                    transition(deployment, resource, ResourceStatus::Destroyed);
                } else {
                    debug!(deployment, resource = %resource.name, status = %resource.status, "resource not visible yet");
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        if resource.status == ResourceStatus::Creating && resource.ready && resource.synced {
            transition(deployment, resource, ResourceStatus::Ready);
            return Ok(());
        }

        // updated_at_ms is the moment the current status was entered.
        let deadline = resource
            .updated_at_ms
            .saturating_add(self.reconcile_interval.as_millis() as u64);
        let stuck = matches!(
            resource.status,
            ResourceStatus::Creating | ResourceStatus::Destroying
        );
        if stuck && now_ms >= deadline {
            let was = resource.status;
            transition(deployment, resource, ResourceStatus::Degraded);
            if was == ResourceStatus::Creating {
                warn!(deployment, resource = %resource.name, "deleting resource that never became ready");
                self.delete_idempotent(resource).await?;
            }
        }
        Ok(())
    }

    async fn destroy(&self, deployment: &mut Deployment) -> DeployResult<()> {
        let id = deployment.id().to_string();
        for resource in deployment.resources_mut() {
            if resource.status == ResourceStatus::Destroyed {
                continue;
            }
            transition(&id, resource, ResourceStatus::Destroying);
            match self.backend.delete_resource(resource).await {
                Ok(()) => {}
                Err(DeployError::NotFound(_)) => {
                    transition(&id, resource, ResourceStatus::Destroyed);
                }
                Err(e) => return Err(e),
            }
        }
        info!(deployment = %id, "deployment destroy requested");
        Ok(())
    }

    async fn delete_idempotent(&self, resource: &Resource) -> DeployResult<()> {
        match self.backend.delete_resource(resource).await {
            Ok(()) | Err(DeployError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn transition(deployment: &str, resource: &mut Resource, to: ResourceStatus) {
    info!(
        deployment,
        resource = %resource.name,
        from = %resource.status,
        to = %to,
        "resource status changed"
    );
    resource.set_status(to);
}

impl DeploymentService for DeploymentReconciler {
    fn create_deployment<'a>(&'a self, template: &'a DeploymentTemplate) -> DeployFuture<'a, Deployment> {
        Box::pin(self.create(template))
    }

    fn process_deployment_status<'a>(&'a self, deployment: &'a mut Deployment) -> DeployFuture<'a, ()> {
        Box::pin(self.process(deployment))
    }

    fn destroy_deployment<'a>(&'a self, deployment: &'a mut Deployment) -> DeployFuture<'a, ()> {
        Box::pin(self.destroy(deployment))
    }
}
