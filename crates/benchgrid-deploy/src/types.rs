//! Deployment data model.
//!
//! A [`DeploymentTemplate`] is what the provisioner asks for. A
//! [`Deployment`] is what a backend made of it: one [`Resource`] for the
//! network and one per VM, each carrying a [`ResourceStatus`].

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use bench_core::config::VmUser;
use bench_core::{Hardware, Identifier, Labels, Network, epoch_millis};
use serde::{Deserialize, Serialize};

/// Lifecycle of one deployed resource.
///
/// ```text
/// CREATING ──ready & synced──▶ READY
///    │
///    └──reconcile interval elapsed──▶ DEGRADED ──not found──▶ DESTROYED
///
/// DESTROYING ──not found──▶ DESTROYED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Creating,
    Ready,
    Degraded,
    Destroying,
    Destroyed,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Creating => "CREATING",
            ResourceStatus::Ready => "READY",
            ResourceStatus::Degraded => "DEGRADED",
            ResourceStatus::Destroying => "DESTROYING",
            ResourceStatus::Destroyed => "DESTROYED",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One externally managed object (network or VM) and its observed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Stable key shared with the backend.
    pub id: String,
    pub name: String,
    pub status: ResourceStatus,
    pub ready: bool,
    pub synced: bool,
    pub external_id: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Resource {
    pub fn creating(id: &str, name: &str) -> Self {
        let now = epoch_millis();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            status: ResourceStatus::Creating,
            ready: false,
            synced: false,
            external_id: None,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    pub fn set_status(&mut self, status: ResourceStatus) {
        self.status = status;
        self.updated_at_ms = epoch_millis();
    }
}

/// Requested shape of one VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmTemplate {
    pub identifier: Identifier,
    pub hardware: Hardware,
    pub base_image_id: String,
    pub has_public_ip: bool,
    pub vm_user: VmUser,
    pub internal_ip: Ipv4Addr,
    /// Environment written into the VM's bootstrap payload.
    pub cloud_init_env: BTreeMap<String, String>,
    pub labels: Labels,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTemplate {
    pub identifier: Identifier,
    pub network: Network,
    pub vm_templates: Vec<VmTemplate>,
    pub metadata: Labels,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    pub template: VmTemplate,
    pub resource: Resource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub template: DeploymentTemplate,
    pub network: Resource,
    pub vms: Vec<Vm>,
}

impl Deployment {
    /// Fresh deployment with every resource CREATING.
    pub fn from_template(template: &DeploymentTemplate) -> Self {
        let network = Resource::creating(
            &template.network.identifier.id,
            &format!("network-{}", template.network.identifier.name),
        );
        let vms = template
            .vm_templates
            .iter()
            .map(|vm| Vm {
                template: vm.clone(),
                resource: Resource::creating(&vm.identifier.id, &vm.identifier.name),
            })
            .collect();
        Self {
            template: template.clone(),
            network,
            vms,
        }
    }

    pub fn id(&self) -> &str {
        &self.template.identifier.id
    }

    /// Network first, then VMs in template order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        std::iter::once(&self.network).chain(self.vms.iter().map(|vm| &vm.resource))
    }

    pub fn resources_mut(&mut self) -> impl Iterator<Item = &mut Resource> {
        std::iter::once(&mut self.network).chain(self.vms.iter_mut().map(|vm| &mut vm.resource))
    }

    pub fn is_ready(&self) -> bool {
        self.resources().all(|r| r.status == ResourceStatus::Ready)
    }

    pub fn is_destroyed(&self) -> bool {
        self.resources().all(|r| r.status == ResourceStatus::Destroyed)
    }

    /// First resource that gave up converging.
    pub fn degraded(&self) -> Option<&Resource> {
        self.resources().find(|r| r.status == ResourceStatus::Degraded)
    }

    /// The VM created from the template with this identifier id.
    pub fn vm(&self, template_id: &str) -> Option<&Vm> {
        self.vms.iter().find(|vm| vm.template.identifier.id == template_id)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use bench_core::Target;

    pub fn vm_template(name: &str, ip: Ipv4Addr) -> VmTemplate {
        VmTemplate {
            identifier: Identifier::new(name, Target::Docker),
            hardware: Hardware::new(1, 1, 10),
            base_image_id: "ubuntu-22-04".to_string(),
            has_public_ip: false,
            vm_user: VmUser::default(),
            internal_ip: ip,
            cloud_init_env: BTreeMap::new(),
            labels: Labels::new(),
        }
    }

    pub fn template(vms: usize) -> DeploymentTemplate {
        DeploymentTemplate {
            identifier: Identifier::new("test-deployment", Target::Docker),
            network: Network {
                identifier: Identifier::new("bench", Target::Docker),
                cidr: "172.28.0.0/24".to_string(),
                ips: (0..vms as u8).map(|i| Ipv4Addr::new(172, 28, 0, 4 + i)).collect(),
            },
            vm_templates: (0..vms as u8)
                .map(|i| vm_template(&format!("vm-{i}"), Ipv4Addr::new(172, 28, 0, 4 + i)))
                .collect(),
            metadata: Labels::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_deployment_is_creating() {
        let d = Deployment::from_template(&fixtures::template(2));
        assert_eq!(d.resources().count(), 3);
        assert!(d.resources().all(|r| r.status == ResourceStatus::Creating));
        assert!(!d.is_ready());
        assert!(d.degraded().is_none());
        let first = &d.template.vm_templates[0].identifier.id;
        assert_eq!(d.vm(first).unwrap().resource.id, *first);
    }

    #[test]
    fn status_serializes_upper_case() {
        let json = serde_json::to_string(&ResourceStatus::Destroying).unwrap();
        assert_eq!(json, "\"DESTROYING\"");
        assert_eq!(ResourceStatus::Degraded.to_string(), "DEGRADED");
    }
}
