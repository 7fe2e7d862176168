//! `benchd provision` — one full run lifecycle.

use std::path::Path;
use std::sync::Arc;

use bench_core::config::duration_field;
use bench_core::{BenchConfig, Cancellation, RunContext, Target};
use benchgrid_deploy::{DeploymentReconciler, DeploymentRegistry, MemoryBackend};
use benchgrid_provision::{ProvisionRequest, ProvisionedRun, ProvisionerService};
use benchgrid_state::{KvStore, StateStore};
use tracing::{info, warn};

use super::{print_json, read_toml};

/// Polls a fresh in-memory resource needs before it reports RUNNING.
const DRY_RUN_READY_AFTER: u32 = 2;

pub async fn provision(
    config: &BenchConfig,
    request: &Path,
    target: Target,
    dry_run: bool,
) -> anyhow::Result<()> {
    if !dry_run {
        anyhow::bail!("no VM backend is configured for target {}; rerun with --dry-run", target.as_str());
    }
    let request: ProvisionRequest = read_toml(request)?;

    // ── Cancellation ───────────────────────────────────────────────
    let (cancel_handle, cancel) = Cancellation::pair();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel_handle.cancel();
        }
    });

    let result = dry_run_lifecycle(config, &request, target, &cancel).await;
    ctrl_c.abort();
    let run = result?;
    print_json(&run)
}

/// Provision against an in-memory store and backend, then tear everything down.
pub(crate) async fn dry_run_lifecycle(
    config: &BenchConfig,
    request: &ProvisionRequest,
    target: Target,
    cancel: &Cancellation,
) -> anyhow::Result<ProvisionedRun> {
    // ── Initialize subsystems ──────────────────────────────────────
    let store: Arc<dyn KvStore> = Arc::new(StateStore::open_in_memory()?);
    let reconcile_interval =
        duration_field("reconcile.reconcile_interval", &config.reconcile.reconcile_interval)?;
    let backend = Arc::new(MemoryBackend::new(DRY_RUN_READY_AFTER));
    let reconciler = Arc::new(DeploymentReconciler::new(backend, reconcile_interval));
    let mut registry = DeploymentRegistry::new();
    registry
        .register(Target::Docker, reconciler.clone())
        .register(Target::YandexCloud, reconciler);
    let service = ProvisionerService::from_config(config, store, registry)?;

    // ── Run ────────────────────────────────────────────────────────
    let run_context = RunContext::new(target);
    let mut run = service.provision(&run_context, request, cancel).await?;
    info!(
        run_id = %run.run.run_id,
        cidr = %run.placement.network.cidr,
        vms = run.placement.items.len(),
        "run provisioned"
    );

    service.teardown(&mut run, cancel).await?;
    info!(run_id = %run.run.run_id, "run torn down");
    Ok(run)
}
