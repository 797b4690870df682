//! CLI binary for duewatch.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use duewatch::config::LoggingConfig;
use duewatch::startup::{self, PreflightSeverity};
use duewatch::{DuewatchConfig, ExecutionMode};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// duewatch: due-date notification cycles.
#[derive(Parser)]
#[command(name = "duewatch", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Run one notification cycle.
    Run(RunArgs),

    /// Serve the inbound action gateway.
    Serve,

    /// Drop idempotency entries older than the retention window.
    Prune,

    /// Validate configuration and report problems.
    CheckConfig,
}

#[derive(Args)]
struct RunArgs {
    /// Named horizon preset from `cycle.profiles` (e.g. `morning`).
    #[arg(long, conflicts_with = "horizon")]
    profile: Option<String>,

    /// Horizon in days, overriding any profile.
    #[arg(long)]
    horizon: Option<u32>,

    /// Send and record. Without this flag `cycle.dry_run` decides.
    #[arg(long)]
    live: bool,

    /// Trigger label recorded in logs and metrics.
    #[arg(long, default_value = "manual")]
    reason: String,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<DuewatchConfig> {
    let path = path
        .cloned()
        .unwrap_or_else(DuewatchConfig::default_config_path);
    let mut config = if path.exists() {
        DuewatchConfig::from_file(&path)?
    } else {
        DuewatchConfig::default()
    };
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

/// Stderr logging plus an optional daily file. The returned guard must live
/// until exit so buffered file lines are flushed.
fn init_logging(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter))
    };
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let Some(dir) = config.dir.as_ref() else {
        tracing_subscriber::registry().with(stderr).init();
        return None;
    };
    let appender = tracing_appender::rolling::daily(dir, "duewatch.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(filter());
    tracing_subscriber::registry().with(stderr).with(file).init();
    Some(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let _log_guard = init_logging(&config.logging);

    match cli.command {
        Command::Run(args) => run_cycle(config, args).await,
        Command::Serve => serve(config).await,
        Command::Prune => prune(&config),
        Command::CheckConfig => Ok(check_config(&config)),
    }
}

async fn run_cycle(config: DuewatchConfig, args: RunArgs) -> anyhow::Result<ExitCode> {
    let mode = if args.live || !config.cycle.dry_run {
        ExecutionMode::Live
    } else {
        ExecutionMode::DryRun
    };
    let orchestrator = startup::build_orchestrator(&config)?;
    let request = orchestrator.request(args.profile.as_deref(), args.horizon, &args.reason, mode);
    let report = orchestrator.run_cycle(request).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.outcome.is_completed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(2))
    }
}

async fn serve(config: DuewatchConfig) -> anyhow::Result<ExitCode> {
    let orchestrator = Arc::new(startup::build_orchestrator(&config)?);
    duewatch::channels::run_gateway(config.gateway.clone(), orchestrator).await?;
    Ok(ExitCode::SUCCESS)
}

fn prune(config: &DuewatchConfig) -> anyhow::Result<ExitCode> {
    // Opening the store prunes it.
    let store = startup::open_store(config)?;
    let stats = store.stats().map_err(|e| anyhow::anyhow!("store stats: {e}"))?;
    println!(
        "{}: {} sent, {} acknowledged, oldest day {}",
        store.path().display(),
        stats.sent,
        stats.acknowledged,
        stats.oldest_day.as_deref().unwrap_or("-")
    );
    Ok(ExitCode::SUCCESS)
}

fn check_config(config: &DuewatchConfig) -> ExitCode {
    let issues = startup::preflight(config);
    if issues.is_empty() {
        println!("configuration OK");
        return ExitCode::SUCCESS;
    }
    for issue in &issues {
        println!("{:<7} {:<22} {}", issue.severity, issue.id, issue.summary);
    }
    if issues.iter().any(|i| i.severity == PreflightSeverity::Error) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
