//! benchd — the benchgrid command line.
//!
//! Drives the provisioning engine from a shell:
//! - plan a database template onto a throwaway network
//! - reserve and free subnets in the shared state store
//! - inspect, reserve and free quotas
//! - run a full provision and teardown against the in-memory backend
//!
//! # Usage
//!
//! ```text
//! benchd --config benchd.toml plan --template cluster.toml
//! benchd reserve-network --target docker --count 4
//! benchd provision --request run.toml --dry-run
//! ```

use std::path::PathBuf;

use bench_core::{BenchConfig, QuotaKind, Target};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;

mod commands;

#[derive(Parser)]
#[command(
    name = "benchd",
    about = "benchgrid — benchmark infrastructure provisioning",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file; built-in defaults when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `state.data_dir` from the configuration.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Expand a database template onto a network that is not reserved anywhere.
    Plan {
        /// TOML file holding one database template.
        #[arg(short, long)]
        template: PathBuf,
        #[arg(long, value_enum, default_value_t = TargetArg::Docker)]
        target: TargetArg,
    },
    /// Reserve a subnet with `count` addresses.
    ReserveNetwork {
        #[arg(long, value_enum, default_value_t = TargetArg::Docker)]
        target: TargetArg,
        #[arg(long, default_value = "3")]
        count: usize,
    },
    /// Return a subnet to its pool.
    FreeNetwork {
        #[arg(long, value_enum, default_value_t = TargetArg::Docker)]
        target: TargetArg,
        #[arg(long)]
        cidr: String,
    },
    /// Show or move quota counters.
    Quota {
        #[command(subcommand)]
        action: QuotaAction,
    },
    /// Provision a run, wait until ready, then tear it down.
    Provision {
        /// TOML file holding the database reference and load generator hardware.
        #[arg(short, long)]
        request: PathBuf,
        #[arg(long, value_enum, default_value_t = TargetArg::Docker)]
        target: TargetArg,
        /// Use an in-memory store and backend instead of real resources.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum QuotaAction {
    /// Remaining capacity of every configured counter.
    Show,
    Reserve {
        #[arg(long, value_enum)]
        target: TargetArg,
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long, default_value = "1")]
        amount: i64,
    },
    Free {
        #[arg(long, value_enum)]
        target: TargetArg,
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long, default_value = "1")]
        amount: i64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetArg {
    Docker,
    YandexCloud,
}

impl From<TargetArg> for Target {
    fn from(t: TargetArg) -> Self {
        match t {
            TargetArg::Docker => Target::Docker,
            TargetArg::YandexCloud => Target::YandexCloud,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Vm,
    Subnet,
    PublicIp,
}

impl From<KindArg> for QuotaKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Vm => QuotaKind::Vm,
            KindArg::Subnet => QuotaKind::Subnet,
            KindArg::PublicIp => QuotaKind::PublicIpAddress,
        }
    }
}

const DEFAULT_LOG_FILTER: &str = "info,benchd=debug,benchgrid=debug";

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<BenchConfig> {
    let mut config = match &cli.config {
        Some(path) => BenchConfig::from_file(path)?,
        None => BenchConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.state.data_dir = dir.clone();
    }
    debug!(data_dir = ?config.state.data_dir, "configuration loaded");
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;
    let config = load_config(&cli)?;

    match cli.command {
        Command::Plan { template, target } => commands::plan::plan(&config, &template, target.into()),
        Command::ReserveNetwork { target, count } => {
            commands::network::reserve(&config, target.into(), count).await
        }
        Command::FreeNetwork { target, cidr } => commands::network::free(&config, target.into(), &cidr),
        Command::Quota { action } => match action {
            QuotaAction::Show => commands::quota::show(&config),
            QuotaAction::Reserve {
                target,
                kind,
                amount,
            } => commands::quota::reserve(&config, target.into(), kind.into(), amount),
            QuotaAction::Free {
                target,
                kind,
                amount,
            } => commands::quota::free(&config, target.into(), kind.into(), amount),
        },
        Command::Provision {
            request,
            target,
            dry_run,
        } => commands::provision::provision(&config, &request, target.into(), dry_run).await,
    }
}
