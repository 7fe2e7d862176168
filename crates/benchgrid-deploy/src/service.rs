//! The contract every deployment backend implements.

use std::future::Future;
use std::pin::Pin;

use crate::error::DeployResult;
use crate::types::{Deployment, DeploymentTemplate};

/// Boxed future returned by backend calls.
pub type DeployFuture<'a, T> = Pin<Box<dyn Future<Output = DeployResult<T>> + Send + 'a>>;

/// Creates, advances and destroys deployments on one backend.
///
/// Implementations must treat a resource the backend no longer knows about
/// as already destroyed: `destroy_deployment` on a gone deployment succeeds.
pub trait DeploymentService: Send + Sync {
    /// Start creating every resource of `template`.
    fn create_deployment<'a>(&'a self, template: &'a DeploymentTemplate) -> DeployFuture<'a, Deployment>;

    /// Observe the backend once and advance resource statuses in place.
    ///
    /// Every resource is visited even when one of them fails; transitions
    /// made in the pass are kept and the first error is returned.
    fn process_deployment_status<'a>(&'a self, deployment: &'a mut Deployment) -> DeployFuture<'a, ()>;

    /// Ask the backend to delete every resource.
    fn destroy_deployment<'a>(&'a self, deployment: &'a mut Deployment) -> DeployFuture<'a, ()>;
}
