//! # Harvest CLI
//!
//! Scheduled discovery of newly modified files, queued for download.
//!
//! Usage:
//!   harvest serve                                   # Run the scheduler until Ctrl+C
//!   harvest task list                               # Show all tasks
//!   harvest task add --name tv --path /tv --schedule "0 2 * * *"
//!   harvest task run <ID>                           # Run once now and wait
//!   harvest config show                             # Show configuration
//!
//! Task commands edit the store directly; stop `serve` before using them.
//! Task ids may be given as any unique prefix of the id shown by `task list`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use harvest_adapters::{Aria2InputFileDispatcher, LocalDirProvider};
use harvest_core::HarvestConfig;
use harvest_core::types::{ScheduledTask, TaskDraft};
use harvest_scheduler::notify::{format_duration, format_size};
use harvest_scheduler::{
    NotifyRouter, Pipeline, PipelineSettings, SchedulerEngine, TaskStore, TracingNotifier, WebhookNotifier,
};
use tracing_subscriber::EnvFilter;

const DRAIN_SLACK_SECS: u64 = 30;

#[derive(Parser)]
#[command(
    name = "harvest",
    version,
    about = "🌾 Harvest — cron-driven download batches from a remote file tree"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Serve,

    /// Manage scheduled tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show system info
    Info,
}

#[derive(Subcommand)]
enum TaskAction {
    /// List tasks
    List {
        /// Only tasks created by this owner
        #[arg(long)]
        owner: Option<String>,
    },
    /// Show one task as JSON (ids may be shortened to a unique prefix)
    Show { id: String },
    /// Create a task
    Add {
        #[arg(long)]
        name: String,
        /// Remote path to scan
        #[arg(long)]
        path: String,
        /// 5-field cron expression
        #[arg(long)]
        schedule: String,
        /// Scan window in hours
        #[arg(long, default_value_t = 24)]
        lookback: u32,
        #[arg(long)]
        video_only: bool,
        /// Report what would be downloaded without queueing anything
        #[arg(long)]
        preview_only: bool,
        /// Create the task disabled
        #[arg(long)]
        disabled: bool,
        #[arg(long, default_value = "cli")]
        owner: String,
    },
    /// Delete a task
    Remove { id: String },
    /// Enable a task
    Enable { id: String },
    /// Disable a task
    Disable { id: String },
    /// Run a task once and wait for the result
    Run { id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(HarvestConfig::default_path);
    let config = HarvestConfig::load_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Serve => serve(&config).await?,

        Commands::Task { action } => {
            let engine = build_engine(&config)?;
            match action {
                TaskAction::List { owner } => {
                    let tasks = match owner {
                        Some(owner) => engine.get_tasks_by_owner(&owner),
                        None => engine.list_tasks(),
                    };
                    print_tasks(&tasks);
                }
                TaskAction::Show { id } => {
                    let id = engine.resolve_id(&id)?;
                    let task = engine.get_task(&id)?;
                    println!("{}", serde_json::to_string_pretty(&task)?);
                }
                TaskAction::Add { name, path, schedule, lookback, video_only, preview_only, disabled, owner } => {
                    let task = engine.create_task(TaskDraft {
                        name,
                        path,
                        schedule,
                        lookback_window: lookback,
                        video_only,
                        preview_only,
                        enabled: !disabled,
                        owner_id: owner,
                    })?;
                    println!("✅ Created task {} ({})", task.name, task.id);
                }
                TaskAction::Remove { id } => {
                    let id = engine.resolve_id(&id)?;
                    engine.delete_task(&id)?;
                    println!("🗑️  Deleted task {id}");
                }
                TaskAction::Enable { id } => {
                    let id = engine.resolve_id(&id)?;
                    let task = engine.toggle_task(&id, true)?;
                    println!("✅ Enabled {}", task.name);
                }
                TaskAction::Disable { id } => {
                    let id = engine.resolve_id(&id)?;
                    let task = engine.toggle_task(&id, false)?;
                    println!("⏸️  Disabled {}", task.name);
                }
                TaskAction::Run { id } => {
                    let id = engine.resolve_id(&id)?;
                    let summary = engine.run_task_now(&id)?.await?;
                    println!("{} — {} file(s)", summary.outcome, summary.file_count);
                    if summary.succeeded + summary.failed > 0 {
                        println!("   Queued: {} ok, {} failed", summary.succeeded, summary.failed);
                    }
                    println!("   Size: {}", format_size(summary.total_size));
                    println!("   Took: {}", format_duration(Duration::from_millis(summary.duration_ms)));
                    if let Some(err) = summary.error {
                        println!("   Error: {err}");
                    }
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let content = toml::to_string_pretty(&config)?;
                println!("{content}");
            }
            ConfigAction::Init { force } => {
                if config_path.exists() && !force {
                    anyhow::bail!("{} already exists (use --force to overwrite)", config_path.display());
                }
                HarvestConfig::default().save_to(&config_path)?;
                println!("✅ Config saved to: {}", config_path.display());
            }
        },

        Commands::Info => {
            println!("🌾 Harvest v{}", env!("CARGO_PKG_VERSION"));
            println!("   Platform: {} / {}", std::env::consts::OS, std::env::consts::ARCH);
            println!("   Config: {}", config_path.display());
            println!("   Data: {}", config.data_path().display());
            println!("   Source root: {}", config.source.root);
            println!("   aria2 input file: {}", config.download.input_file);
            println!("   Scheduler: {}", if config.scheduler.enabled { "enabled" } else { "disabled" });
            println!("   Overlap: {:?}", config.scheduler.overlap);
            println!("   Webhook: {}", config.notify.webhook_url.as_deref().unwrap_or("(none)"));
        }
    }

    Ok(())
}

fn init_logging(config: &HarvestConfig, verbose: bool) {
    let filter = if verbose {
        "harvest=debug,harvest_core=debug,harvest_scheduler=debug,harvest_adapters=debug".to_string()
    } else {
        let level = &config.log.level;
        format!("harvest={level},harvest_core={level},harvest_scheduler={level},harvest_adapters={level}")
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if config.log.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

fn build_engine(config: &HarvestConfig) -> Result<SchedulerEngine> {
    let store = Arc::new(TaskStore::open(config.data_path())?);

    let mut router = NotifyRouter::new();
    if config.notify.log {
        router = router.with(Arc::new(TracingNotifier));
    }
    if let Some(url) = &config.notify.webhook_url {
        router = router.with(Arc::new(WebhookNotifier::new(url.clone())));
    }

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        Arc::new(LocalDirProvider::from_config(config)),
        Arc::new(Aria2InputFileDispatcher::from_config(config)),
        Arc::new(router),
        PipelineSettings::from(&config.scheduler),
    ));
    Ok(SchedulerEngine::new(store, pipeline))
}

async fn serve(config: &HarvestConfig) -> Result<()> {
    let engine = build_engine(config)?;
    tracing::info!("🌾 Harvest v{} — store: {}", env!("CARGO_PKG_VERSION"), engine.store().path().display());

    if !config.scheduler.enabled {
        tracing::warn!("Scheduler disabled in config ([scheduler] enabled = false), nothing to do");
        return Ok(());
    }

    let seeded = engine.seed_tasks(&config.scheduler.tasks);
    if seeded > 0 {
        tracing::info!("Seeded {seeded} task(s) from config");
    }
    engine.start();

    println!("Scheduler is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    engine.stop();

    // Runs are bounded by the collaborator timeouts plus notification time
    let grace = Duration::from_secs(
        config.scheduler.provider_timeout_secs + config.scheduler.dispatch_timeout_secs + DRAIN_SLACK_SECS,
    );
    println!("\nWaiting for running tasks to finish (Ctrl+C again to quit now)...");
    tokio::select! {
        finished = engine.drain(grace) => {
            if !finished {
                tracing::warn!("Gave up waiting for running tasks after {grace:?}");
            }
        }
        _ = tokio::signal::ctrl_c() => tracing::warn!("Interrupted, abandoning running tasks"),
    }
    println!("👋 Scheduler stopped.");
    Ok(())
}

fn print_tasks(tasks: &[ScheduledTask]) {
    if tasks.is_empty() {
        println!("(no tasks)");
        return;
    }
    println!(
        "{:<8}  {:<20}  {:<15}  {:<3}  {:<7}  {:<16}  {}",
        "ID", "NAME", "SCHEDULE", "ON", "STATUS", "NEXT RUN", "RUNS (ok/fail)"
    );
    for t in tasks {
        println!(
            "{:<8}  {:<20}  {:<15}  {:<3}  {:<7}  {:<16}  {} ({}/{})",
            t.id.chars().take(8).collect::<String>(),
            t.name.chars().take(20).collect::<String>(),
            t.schedule,
            if t.enabled { "yes" } else { "no" },
            t.status.to_string(),
            local_time(t.next_run_at),
            t.run_count,
            t.success_count,
            t.failure_count,
        );
    }
}

fn local_time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".into())
}
