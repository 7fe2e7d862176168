//! ProvisionerService — turns a run request into live, addressed VMs and back.
//!
//! ```text
//!  reserve quotas ─▶ acquire network ─▶ plan intent ─▶ build placement ─▶ deploy ─▶ wait ready
//!        │                 │                                                 │
//!        └── free ◀────────┴── free ◀──────── destroy + confirm ◀────────────┘   (rollback, newest first)
//! ```
//!
//! Each acquisition registers its compensation in a [`UnitOfWork`]; the run
//! commits only once every deployment is ready. A provisioned run is
//! released with [`ProvisionerService::teardown`], which retries transient
//! failures with a constant backoff.

use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bench_core::config::{NetworkConfig, OrchestrationConfig, VmConfig, duration_field};
use bench_core::{
    BenchConfig, Cancellation, Hardware, Identifier, Labels, Network, Quota, QuotaKind, RunContext,
};
use benchgrid_deploy::{
    DeployError, Deployment, DeploymentRegistry, DeploymentService, DeploymentTemplate, Vm, VmTemplate,
    WaitOptions, wait_until_ready,
};
use benchgrid_network::{NetworkManager, SubnetAllocator};
use benchgrid_placement::container::{
    METADATA_LOGICAL_NAME, METADATA_NETWORK_IPV4, METADATA_PLACEMENT_NODE, node_exporter,
};
use benchgrid_placement::{Container, DatabaseTemplate, PlacementIntent, required_address_count};
use benchgrid_state::{DistributedLock, KvStore, LockOptions, QuotaLedger};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ProvisionError, ProvisionResult};
use crate::uow::UnitOfWork;
use crate::worker::{ROLE_DATABASE, ROLE_STROPPY, TaskKind, Worker, role_metadata};

/// Name of the one deployment that holds every VM of a run.
pub const DEPLOYMENT_NAME: &str = "stroppy-test-run-deployment";

/// Tasks the load generator accepts.
const STROPPY_TASKS: [TaskKind; 3] = [
    TaskKind::SetupContainers,
    TaskKind::InstallStroppy,
    TaskKind::RunStroppy,
];

// ── Requests and results ───────────────────────────────────────────

/// The database a run benchmarks: one we place, or one that already exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseRef {
    Template(DatabaseTemplate),
    ConnectionString(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub database: DatabaseRef,
    pub stroppy_hardware: Hardware,
}

/// A placement item wrapped with its worker and VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedItem {
    pub name: String,
    pub containers: Vec<Container>,
    pub vm_template: VmTemplate,
    pub worker: Worker,
    pub metadata: Labels,
}

impl PlacedItem {
    pub fn role(&self) -> Option<&str> {
        self.metadata.get(crate::worker::METADATA_ROLE).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub network: Network,
    pub connection_string: String,
    pub deployment_template: DeploymentTemplate,
    /// Database items in intent order, then the load generator.
    pub items: Vec<PlacedItem>,
}

impl Placement {
    pub fn database_items(&self) -> impl Iterator<Item = &PlacedItem> {
        self.items.iter().filter(|i| i.role() == Some(ROLE_DATABASE))
    }

    pub fn stroppy_item(&self) -> Option<&PlacedItem> {
        self.items.iter().find(|i| i.role() == Some(ROLE_STROPPY))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedItem {
    pub item: PlacedItem,
    pub vm: Vm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedPlacement {
    pub items: Vec<DeployedItem>,
    pub deployment: Deployment,
    pub network: Network,
    pub connection_string: String,
}

impl DeployedPlacement {
    pub fn database_items(&self) -> impl Iterator<Item = &DeployedItem> {
        self.items
            .iter()
            .filter(|i| i.item.role() == Some(ROLE_DATABASE))
    }

    pub fn stroppy_item(&self) -> Option<&DeployedItem> {
        self.items.iter().find(|i| i.item.role() == Some(ROLE_STROPPY))
    }

    /// Replace the deployment with a newer observation of it and refresh item VMs.
    fn refresh(&mut self, deployment: Deployment) {
        for item in &mut self.items {
            if let Some(vm) = deployment.vm(&item.vm.template.identifier.id) {
                item.vm = vm.clone();
            }
        }
        self.deployment = deployment;
    }
}

/// A run whose resources are all acquired and ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedRun {
    pub run: RunContext,
    pub quotas: Vec<Quota>,
    pub placement: DeployedPlacement,
    destroyed: bool,
    network_freed: bool,
    quotas_freed: bool,
}

impl ProvisionedRun {
    fn new(run: RunContext, quotas: Vec<Quota>, placement: DeployedPlacement) -> Self {
        Self {
            run,
            quotas,
            placement,
            destroyed: false,
            network_freed: false,
            quotas_freed: false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.destroyed && self.network_freed && self.quotas_freed
    }
}

// ── Settings ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProvisionerSettings {
    pub network: NetworkConfig,
    pub vm: VmConfig,
    pub orchestration: OrchestrationConfig,
    pub cleanup_attempts: u32,
    pub cleanup_backoff: Duration,
    pub wait: WaitOptions,
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            vm: VmConfig::default(),
            orchestration: OrchestrationConfig::default(),
            cleanup_attempts: 3,
            cleanup_backoff: Duration::from_secs(2),
            wait: WaitOptions::default(),
        }
    }
}

impl ProvisionerSettings {
    pub fn from_config(config: &BenchConfig) -> anyhow::Result<Self> {
        Ok(Self {
            network: config.network.clone(),
            vm: config.vm.clone(),
            orchestration: config.orchestration.clone(),
            cleanup_attempts: config.cleanup.attempts.max(1),
            cleanup_backoff: duration_field("cleanup.backoff", &config.cleanup.backoff)?,
            wait: WaitOptions::from_config(&config.reconcile)?,
        })
    }
}

// ── Service ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ProvisionerService {
    networks: NetworkManager,
    quotas: QuotaLedger,
    deployments: DeploymentRegistry,
    settings: ProvisionerSettings,
}

impl ProvisionerService {
    pub fn new(
        networks: NetworkManager,
        quotas: QuotaLedger,
        deployments: DeploymentRegistry,
        settings: ProvisionerSettings,
    ) -> Self {
        Self {
            networks,
            quotas,
            deployments,
            settings,
        }
    }

    /// Wire every component from `config` over one shared store and create missing quota counters.
    pub fn from_config(
        config: &BenchConfig,
        store: Arc<dyn KvStore>,
        deployments: DeploymentRegistry,
    ) -> anyhow::Result<Self> {
        let lock = DistributedLock::new(store.clone(), LockOptions::from_config(&config.lock)?);
        let networks = NetworkManager::new(
            store.clone(),
            lock,
            SubnetAllocator::new(config.allocator.padding),
        );
        let quotas = QuotaLedger::new(store);
        quotas.init(&config.quotas.to_limits())?;
        Ok(Self::new(
            networks,
            quotas,
            deployments,
            ProvisionerSettings::from_config(config)?,
        ))
    }

    pub fn networks(&self) -> &NetworkManager {
        &self.networks
    }

    pub fn quotas(&self) -> &QuotaLedger {
        &self.quotas
    }

    pub fn settings(&self) -> &ProvisionerSettings {
        &self.settings
    }

    /// Reserve a subnet holding every database item plus the load generator.
    pub async fn acquire_network(
        &self,
        run: &RunContext,
        database: &DatabaseRef,
        cancel: &Cancellation,
    ) -> ProvisionResult<Network> {
        let count = database_vm_count(database) + 1;
        let range = self.settings.network.range_for(run.target);
        let identifier = Identifier::new(&range.name, run.target);
        debug!(run_id = %run.run_id, pool = %range.name, count, "acquiring network");
        Ok(self
            .networks
            .reserve_network(&identifier, &range.base_cidr, range.prefix, count, cancel)
            .await?)
    }

    pub fn free_network(&self, network: &Network) -> ProvisionResult<()> {
        Ok(self.networks.free_network(network)?)
    }

    /// Expand `template` onto an already reserved network.
    pub fn plan_placement_intent(
        &self,
        template: &DatabaseTemplate,
        network: &Network,
    ) -> ProvisionResult<PlacementIntent> {
        validate_network(network)?;
        Ok(benchgrid_placement::plan_placement_intent(template, network)?)
    }

    fn plan(&self, database: &DatabaseRef, network: &Network) -> ProvisionResult<PlacementIntent> {
        match database {
            DatabaseRef::Template(template) => self.plan_placement_intent(template, network),
            DatabaseRef::ConnectionString(dsn) => {
                validate_network(network)?;
                Ok(PlacementIntent {
                    items: Vec::new(),
                    network: network.clone(),
                    connection_string: dsn.clone(),
                })
            }
        }
    }

    /// Give every item a worker and VM, and add the load generator on the first free address.
    pub fn build_placement(
        &self,
        run: &RunContext,
        intent: &PlacementIntent,
        stroppy_hardware: &Hardware,
    ) -> ProvisionResult<Placement> {
        let mut items = Vec::with_capacity(intent.items.len() + 1);
        for item in &intent.items {
            let ip = item.internal_ip.ok_or_else(|| {
                ProvisionError::Config(format!("placement item {} has no address", item.name))
            })?;
            let mut metadata = item.metadata.clone();
            metadata.extend(role_metadata(&run.run_id, ROLE_DATABASE));
            let worker = Worker::new(
                &run.run_id,
                &item.name,
                &database_task_kinds(&item.containers),
                metadata.clone(),
            );
            items.push(PlacedItem {
                name: item.name.clone(),
                containers: item.containers.clone(),
                vm_template: self.vm_template(run, &worker, item.hardware.clone(), ip),
                worker,
                metadata,
            });
        }

        let used: Vec<String> = items
            .iter()
            .map(|i| i.vm_template.internal_ip.to_string())
            .collect();
        let stroppy_ip = self
            .networks
            .allocator()
            .first_free_ip(&intent.network.cidr, &used)?;
        if !intent.network.ips.contains(&stroppy_ip) {
            return Err(ProvisionError::Config(format!(
                "load generator address {stroppy_ip} is outside the reserved addresses of {}",
                intent.network.cidr
            )));
        }
        let metadata = role_metadata(&run.run_id, ROLE_STROPPY);
        let worker = Worker::new(&run.run_id, ROLE_STROPPY, &STROPPY_TASKS, metadata.clone());
        let mut exporter = node_exporter(ROLE_STROPPY, None);
        exporter
            .metadata
            .insert(METADATA_NETWORK_IPV4.to_string(), stroppy_ip.to_string());
        exporter
            .metadata
            .insert(METADATA_PLACEMENT_NODE.to_string(), ROLE_STROPPY.to_string());
        exporter
            .metadata
            .insert(METADATA_LOGICAL_NAME.to_string(), exporter.name.clone());
        items.push(PlacedItem {
            name: ROLE_STROPPY.to_string(),
            containers: vec![exporter],
            vm_template: self.vm_template(run, &worker, stroppy_hardware.clone(), stroppy_ip),
            worker,
            metadata: metadata.clone(),
        });

        let deployment_template = DeploymentTemplate {
            identifier: Identifier::new(DEPLOYMENT_NAME, run.target),
            network: intent.network.clone(),
            vm_templates: items.iter().map(|i| i.vm_template.clone()).collect(),
            metadata,
        };
        debug!(
            run_id = %run.run_id,
            items = items.len(),
            %stroppy_ip,
            "placement built"
        );
        Ok(Placement {
            network: intent.network.clone(),
            connection_string: intent.connection_string.clone(),
            deployment_template,
            items,
        })
    }

    fn vm_template(&self, run: &RunContext, worker: &Worker, hardware: Hardware, ip: Ipv4Addr) -> VmTemplate {
        let vm = &self.settings.vm;
        VmTemplate {
            identifier: Identifier::new(&worker.name, run.target),
            hardware,
            base_image_id: vm.base_image_id.clone(),
            has_public_ip: vm.public_ip && !run.target.is_local(),
            vm_user: vm.user.clone(),
            internal_ip: ip,
            cloud_init_env: worker.bootstrap_env(&self.settings.orchestration),
            labels: worker.metadata.clone(),
        }
    }

    /// Create the deployment and pair every item with the VM made from its template.
    ///
    /// A VM missing from the result fails the call with `VmNotFound` once the
    /// deployment is confirmed destroyed. If it cannot be destroyed the error
    /// is a `Compensation` carrying the destroy failure.
    pub async fn deploy_plan(&self, placement: &Placement) -> ProvisionResult<DeployedPlacement> {
        let service = self
            .deployments
            .get(placement.deployment_template.identifier.target)?;
        let mut deployment = service
            .create_deployment(&placement.deployment_template)
            .await?;

        let mut items = Vec::with_capacity(placement.items.len());
        for item in &placement.items {
            let template_id = &item.vm_template.identifier.id;
            match deployment.vm(template_id).cloned() {
                Some(vm) => items.push(DeployedItem {
                    item: item.clone(),
                    vm,
                }),
                None => {
                    warn!(
                        deployment = %deployment.id(),
                        item = %item.name,
                        vm_template = %template_id,
                        "vm missing from deployment, destroying it"
                    );
                    let missing = ProvisionError::VmNotFound(template_id.clone());
                    return match destroy_and_confirm(
                        service,
                        &mut deployment,
                        &self.settings.wait,
                        &Cancellation::never(),
                    )
                    .await
                    {
                        Ok(()) => Err(missing),
                        Err(e) => {
                            warn!(deployment = %deployment.id(), error = %e, "destroy after missing vm failed");
                            Err(ProvisionError::Compensation {
                                primary: Box::new(missing),
                                cleanup: vec![e],
                            })
                        }
                    };
                }
            }
        }

        info!(deployment = %deployment.id(), vms = items.len(), "placement deployed");
        Ok(DeployedPlacement {
            items,
            deployment,
            network: placement.network.clone(),
            connection_string: placement.connection_string.clone(),
        })
    }

    /// Destroy the deployment, wait until it is gone, then free the network.
    pub async fn destroy_plan(&self, deployed: &mut DeployedPlacement, cancel: &Cancellation) -> ProvisionResult<()> {
        let deployment = self.destroy_owned(deployed.deployment.clone(), cancel).await?;
        deployed.deployment = deployment;
        self.free_network(&deployed.network)
    }

    async fn destroy_owned(&self, mut deployment: Deployment, cancel: &Cancellation) -> ProvisionResult<Deployment> {
        let service = self.deployments.get(deployment.template.identifier.target)?;
        destroy_and_confirm(service, &mut deployment, &self.settings.wait, cancel).await?;
        Ok(deployment)
    }

    // ── Run lifecycle ──────────────────────────────────────────────

    /// Acquire everything a run needs and wait until its VMs are ready.
    ///
    /// On failure every acquisition made so far is released, newest first.
    pub async fn provision(
        &self,
        run: &RunContext,
        request: &ProvisionRequest,
        cancel: &Cancellation,
    ) -> ProvisionResult<ProvisionedRun> {
        let quotas = self.run_quotas(run, &request.database);
        info!(run_id = %run.run_id, target = %run.target, "provisioning run");

        let mut uow = UnitOfWork::new();
        match self.provision_steps(run, request, &quotas, &mut uow, cancel).await {
            Ok(placement) => {
                uow.commit();
                info!(
                    run_id = %run.run_id,
                    cidr = %placement.network.cidr,
                    vms = placement.items.len(),
                    "run provisioned"
                );
                Ok(ProvisionedRun::new(run.clone(), quotas, placement))
            }
            Err(e) => Err(uow.rollback(e).await),
        }
    }

    async fn provision_steps(
        &self,
        run: &RunContext,
        request: &ProvisionRequest,
        quotas: &[Quota],
        uow: &mut UnitOfWork,
        cancel: &Cancellation,
    ) -> ProvisionResult<DeployedPlacement> {
        // Set once a deployment may outlive the rollback; the network and
        // quotas then stay reserved.
        let deployment_live = Arc::new(AtomicBool::new(false));

        self.quotas.reserve(quotas)?;
        {
            let ledger = self.quotas.clone();
            let quotas = quotas.to_vec();
            let live = deployment_live.clone();
            uow.register("free quotas", move || async move {
                if live.load(Ordering::SeqCst) {
                    return Err(ProvisionError::Retained("quotas".to_string()));
                }
                ledger.free(&quotas).map_err(ProvisionError::from)
            });
        }

        let network = self.acquire_network(run, &request.database, cancel).await?;
        {
            let networks = self.networks.clone();
            let network = network.clone();
            let live = deployment_live.clone();
            uow.register("free network", move || async move {
                if live.load(Ordering::SeqCst) {
                    return Err(ProvisionError::Retained(format!("network {}", network.cidr)));
                }
                networks.free_network(&network).map_err(ProvisionError::from)
            });
        }

        let intent = self.plan(&request.database, &network)?;
        let placement = self.build_placement(run, &intent, &request.stroppy_hardware)?;

        let mut deployed = match self.deploy_plan(&placement).await {
            Ok(deployed) => deployed,
            Err(e) => {
                if matches!(e, ProvisionError::Compensation { .. }) {
                    deployment_live.store(true, Ordering::SeqCst);
                }
                return Err(e);
            }
        };
        let service = self.deployments.get(run.target)?;
        {
            let service = service.clone();
            let wait = self.settings.wait.clone();
            let mut deployment = deployed.deployment.clone();
            let live = deployment_live.clone();
            uow.register("destroy deployment", move || async move {
                let destroyed =
                    destroy_and_confirm(service, &mut deployment, &wait, &Cancellation::never()).await;
                if destroyed.is_err() {
                    live.store(true, Ordering::SeqCst);
                }
                destroyed
            });
        }

        let ready = wait_until_ready(
            service,
            vec![deployed.deployment.clone()],
            &self.settings.wait,
            cancel,
        )
        .await?;
        if let Some(deployment) = ready.into_iter().next() {
            deployed.refresh(deployment);
        }
        Ok(deployed)
    }

    /// VM, subnet and public address counts a run consumes on its target.
    pub fn run_quotas(&self, run: &RunContext, database: &DatabaseRef) -> Vec<Quota> {
        let vms = (database_vm_count(database) + 1) as i64;
        let mut quotas = vec![
            Quota::new(run.target, QuotaKind::Vm, vms),
            Quota::new(run.target, QuotaKind::Subnet, 1),
        ];
        if self.settings.vm.public_ip && !run.target.is_local() {
            quotas.push(Quota::new(run.target, QuotaKind::PublicIpAddress, vms));
        }
        quotas
    }

    /// Destroy the deployment, then free the network and quotas.
    ///
    /// Each step is retried on transient errors. The network and quotas stay
    /// reserved while the deployment may still exist. Steps that already
    /// succeeded are skipped when called again.
    pub async fn teardown(&self, run: &mut ProvisionedRun, cancel: &Cancellation) -> ProvisionResult<()> {
        let mut failures = Vec::new();

        if !run.destroyed {
            let current = &run.placement.deployment;
            match self
                .with_retries("destroy deployment", || self.destroy_owned(current.clone(), cancel))
                .await
            {
                Ok(deployment) => {
                    run.placement.refresh(deployment);
                    run.destroyed = true;
                }
                Err(e) => failures.push(e),
            }
        }

        if run.destroyed {
            if !run.network_freed {
                let network = &run.placement.network;
                match self
                    .with_retries("free network", || async move { self.free_network(network) })
                    .await
                {
                    Ok(()) => run.network_freed = true,
                    Err(e) => failures.push(e),
                }
            }
            if !run.quotas_freed {
                let quotas = &run.quotas;
                match self
                    .with_retries("free quotas", || async move {
                        self.quotas.free(quotas).map_err(ProvisionError::from)
                    })
                    .await
                {
                    Ok(()) => run.quotas_freed = true,
                    Err(e) => failures.push(e),
                }
            }
        } else {
            warn!(run_id = %run.run.run_id, "deployment not destroyed, keeping network and quotas reserved");
        }

        if failures.is_empty() {
            info!(run_id = %run.run.run_id, "run torn down");
            Ok(())
        } else {
            Err(ProvisionError::Teardown(failures))
        }
    }

    /// Tear down a run that failed after provisioning and report both failures together.
    pub async fn abandon(&self, run: &mut ProvisionedRun, primary: ProvisionError) -> ProvisionError {
        warn!(run_id = %run.run.run_id, error = %primary, "abandoning run");
        match self.teardown(run, &Cancellation::never()).await {
            Ok(()) => primary,
            Err(ProvisionError::Teardown(cleanup)) => ProvisionError::Compensation {
                primary: Box::new(primary),
                cleanup,
            },
            Err(other) => ProvisionError::Compensation {
                primary: Box::new(primary),
                cleanup: vec![other],
            },
        }
    }

    async fn with_retries<T, F, Fut>(&self, step: &str, mut op: F) -> ProvisionResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProvisionResult<T>>,
    {
        let attempts = self.settings.cleanup_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(step, attempt, attempts, error = %e, "cleanup step failed, retrying");
                    tokio::time::sleep(self.settings.cleanup_backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(step, attempt, error = %e, "cleanup step failed");
                    return Err(e);
                }
            }
        }
    }
}

/// Ask the backend to destroy `deployment` and poll until every resource is gone.
async fn destroy_and_confirm(
    service: Arc<dyn DeploymentService>,
    deployment: &mut Deployment,
    wait: &WaitOptions,
    cancel: &Cancellation,
) -> ProvisionResult<()> {
    if deployment.is_destroyed() {
        return Ok(());
    }
    service.destroy_deployment(deployment).await?;

    let started = Instant::now();
    while !deployment.is_destroyed() {
        if started.elapsed() >= wait.deadline {
            return Err(DeployError::Timeout {
                waited: started.elapsed(),
            }
            .into());
        }
        tokio::select! {
            _ = tokio::time::sleep(wait.poll_interval) => {}
            _ = cancel.cancelled() => {
                return Err(DeployError::Cancelled("destroy confirmation".to_string()).into());
            }
        }
        match service.process_deployment_status(deployment).await {
            Ok(()) => {}
            Err(e) if e.is_transient() => {
                warn!(deployment = %deployment.id(), error = %e, "destroy status poll failed, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    info!(
        deployment = %deployment.id(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "deployment destroyed"
    );
    Ok(())
}

/// VMs the database side of a run needs; an external database needs none.
fn database_vm_count(database: &DatabaseRef) -> usize {
    match database {
        DatabaseRef::Template(template) => required_address_count(template),
        DatabaseRef::ConnectionString(_) => 0,
    }
}

/// Database workers set up their containers and take part in the run.
fn database_task_kinds(containers: &[Container]) -> Vec<TaskKind> {
    let mut kinds = Vec::with_capacity(2);
    if !containers.is_empty() {
        kinds.push(TaskKind::SetupContainers);
    }
    kinds.push(TaskKind::RunStroppy);
    kinds
}

fn validate_network(network: &Network) -> ProvisionResult<()> {
    if network.cidr.is_empty() {
        return Err(ProvisionError::Config("network has no cidr".to_string()));
    }
    if network.ips.is_empty() {
        return Err(ProvisionError::Config(format!(
            "network {} has no addresses",
            network.cidr
        )));
    }
    Ok(())
}
