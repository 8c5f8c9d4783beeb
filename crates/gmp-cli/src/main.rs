use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use gmp_storage::{MemoryGateway, PgStore};
use gmp_sync::{
    maybe_build_scheduler, report_recent_runs, RunGuard, RunTarget, ScheduledSync, SyncConfig,
    SyncPipeline, SyncRunSummary,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "gmp")]
#[command(about = "Grey market premium reconciliation")]
struct Cli {
    /// Debug-level logs for the gmp crates (ignored when RUST_LOG is set).
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Collect every enabled source once, reconcile and persist.
    Sync {
        /// Reconcile into memory and write reports without touching the database.
        #[arg(long)]
        dry_run: bool,
        /// Derive statuses against this date instead of today (YYYY-MM-DD).
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Apply database migrations.
    Migrate,
    /// Run on the configured cron expressions until interrupted.
    Schedule {
        #[arg(long)]
        dry_run: bool,
    },
    /// Summarize the most recent runs.
    Report {
        #[arg(long, default_value_t = 3)]
        runs: usize,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("gmp_sync=debug,gmp_storage=debug,gmp_adapters=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });
    fmt().with_env_filter(filter).with_target(true).init();
}

fn print_summary(summary: &SyncRunSummary) {
    println!(
        "sync complete: run_id={} sources={} candidates={} offerings={} persisted={} failed={} reports={}",
        summary.run_id,
        summary.enabled_sources,
        summary.collected_candidates,
        summary.groups,
        summary.persisted,
        summary.failed_groups.len(),
        summary.reports_dir
    );
}

async fn run_sync(config: SyncConfig, dry_run: bool, today: Option<NaiveDate>) -> Result<()> {
    let pipeline = SyncPipeline::new(config)?;
    let today = today.unwrap_or_else(|| chrono::Local::now().date_naive());

    let summary = if dry_run {
        let mut gateway = MemoryGateway::new();
        pipeline.run_once_on(&mut gateway, today).await?
    } else {
        let store = PgStore::connect(&pipeline.config().database_url).await?;
        let mut session = store.session().await?;
        let result = pipeline.run_once_on(&mut session, today).await;
        session.release();
        store.close().await;
        result?
    };
    print_summary(&summary);
    Ok(())
}

async fn run_schedule(config: SyncConfig, dry_run: bool) -> Result<()> {
    let target = if dry_run {
        RunTarget::DryRun
    } else {
        RunTarget::Database(PgStore::connect(&config.database_url).await?)
    };
    let pipeline = Arc::new(SyncPipeline::new(config)?);
    let sync = Arc::new(ScheduledSync::new(pipeline, target, RunGuard::new()));

    let Some(mut sched) = maybe_build_scheduler(sync).await? else {
        bail!("scheduling is disabled; set GMP_SCHEDULER_ENABLED=true");
    };
    sched.start().await?;
    info!("scheduler started; waiting for ctrl-c");
    tokio::signal::ctrl_c().await?;
    sched.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync {
        dry_run: false,
        today: None,
    }) {
        Commands::Sync { dry_run, today } => run_sync(config, dry_run, today).await?,
        Commands::Migrate => {
            let store = PgStore::connect(&config.database_url).await?;
            store.migrate().await?;
            store.close().await;
            println!("migrations applied");
        }
        Commands::Schedule { dry_run } => run_schedule(config, dry_run).await?,
        Commands::Report { runs } => {
            println!("{}", report_recent_runs(runs, &config.reports_dir)?);
        }
    }

    Ok(())
}
