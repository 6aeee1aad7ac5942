// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use dlnotify::coordinator::{self, event_channel, TokioDrainTimer, TokioTaskScheduler};
use dlnotify::host::{LogEngine, LogSurface, LoopbackHost};
use dlnotify::notify::budget::ResumptionBudget;
use dlnotify::notify::render::format_bytes;
use dlnotify::notify::{
    Collaborators, DirectorSnapshot, NotificationDirector, PauseCause, PersistentEntryStore,
    ProgressInfo, TransferEvent, TransferId, TransferStatus,
};
use dlnotify::storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
use dlnotify::NotifyConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "dlnotify")]
#[command(version = VERSION)]
#[command(about = "Download notification coordination")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of ~/.dlnotify/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose mode: debug-level logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show persisted transfers and the remaining resumption budget
    ///
    /// Examples:
    ///   dlnotify status
    ///   dlnotify s
    #[command(alias = "s")]
    Status,

    /// Restore the full automatic-resumption budget
    ClearBudget,

    /// Write the effective configuration to the config file
    ///
    /// Examples:
    ///   dlnotify init-config
    ///   dlnotify init-config --config ./dlnotify.json
    InitConfig,

    /// Run the coordinator against log-backed collaborators
    ///
    /// Examples:
    ///   dlnotify simulate
    ///   dlnotify simulate --transfers 5 -v
    Simulate {
        /// Number of concurrent scripted transfers
        #[arg(short, long, default_value_t = 3)]
        transfers: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => NotifyConfig::load_from(path)?,
        None => NotifyConfig::load()?,
    };
    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Status => show_status(&config),
        Commands::ClearBudget => clear_budget(&config),
        Commands::InitConfig => init_config(&config, cli.config.as_deref()),
        Commands::Simulate { transfers } => {
            let runtime = tokio::runtime::Runtime::new()
                .context("Failed to create tokio runtime")?;
            runtime.block_on(simulate(&config, transfers))
        }
    }
}

fn init_logging(config: &NotifyConfig, verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config
            .log_level
            .parse::<tracing::Level>()
            .unwrap_or(tracing::Level::INFO)
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn open_state(config: &NotifyConfig) -> Result<Arc<dyn KeyValueStore>> {
    let store = FileKeyValueStore::open(config.state_path())?;
    Ok(Arc::new(store))
}

fn show_status(config: &NotifyConfig) -> Result<()> {
    let store = FileKeyValueStore::open(config.state_path())?;
    let state_path = store.path().to_path_buf();
    let storage: Arc<dyn KeyValueStore> = Arc::new(store);
    let entries = PersistentEntryStore::load(Arc::clone(&storage))?;
    let budget = ResumptionBudget::new(storage, config.resumption_attempts);

    println!();
    println!("{}", "=== dlnotify Status ===".cyan().bold());
    println!();
    println!("{} State: {}", "[i]".blue(), state_path.display());
    println!(
        "{} Resumption budget: {}/{}",
        "[i]".blue(),
        budget.remaining().to_string().bold(),
        budget.max_attempts()
    );
    println!();

    let mut all = entries.all();
    all.sort_by(|a, b| a.id.cmp(&b.id));
    if all.is_empty() {
        println!("{} No persisted transfers", "[✓]".green());
        return Ok(());
    }

    println!("{}", format!("Persisted transfers ({})", all.len()).bold());
    for entry in all {
        let resume = if entry.auto_resumable {
            "auto-resume".green()
        } else {
            "manual".yellow()
        };
        let network = if entry.metered_allowed {
            "any network"
        } else {
            "unmetered"
        };
        println!(
            "  #{:<4} {:<32} {} ({}) {}",
            entry.surface_handle,
            entry.display_name,
            resume,
            network,
            entry.id.to_string().dimmed()
        );
    }
    Ok(())
}

fn clear_budget(config: &NotifyConfig) -> Result<()> {
    let storage = open_state(config)?;
    let mut budget = ResumptionBudget::new(storage, config.resumption_attempts);
    budget.clear()?;
    println!(
        "{} Resumption budget restored to {}",
        "[✓]".green(),
        budget.max_attempts()
    );
    Ok(())
}

fn init_config(config: &NotifyConfig, path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => NotifyConfig::default_path()?,
    };
    config.save_to(&path)?;
    println!("{} Config written to {}", "[✓]".green(), path.display());
    Ok(())
}

async fn simulate(config: &NotifyConfig, transfers: usize) -> Result<()> {
    let (sender, receiver) = event_channel();
    let collaborators = Collaborators {
        surface: Box::new(LogSurface::new(config.surface_preserves_detached)),
        host: Box::new(LoopbackHost::new(sender.clone())),
        engine: Box::new(LogEngine),
        scheduler: Box::new(TokioTaskScheduler::new(sender.clone())?),
        timer: Box::new(TokioDrainTimer::new(sender.clone())?),
    };
    let director = NotificationDirector::new(
        Arc::new(MemoryKeyValueStore::new()),
        config.director_settings(),
        collaborators,
    )?;
    let (handle, task) = coordinator::spawn(director, sender, receiver);

    let total: u64 = 4 * 1024 * 1024;
    let ids: Vec<_> = (0..transfers)
        .map(|n| TransferId::new("simulate", n.to_string()))
        .collect();

    for step in 1..=10u64 {
        for (n, id) in ids.iter().enumerate() {
            let name = format!("file-{}.bin", n);
            let status = if step < 10 {
                TransferStatus::InProgress(ProgressInfo::from_bytes(total * step / 10, Some(total)))
            } else if n % 3 == 2 {
                TransferStatus::Paused {
                    cause: PauseCause::WaitingForNetwork,
                    resumable: true,
                }
            } else {
                TransferStatus::Succeeded { total_bytes: total }
            };
            handle.transfer_event(TransferEvent::new(id.clone(), name, status))?;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Every scripted event is handled once the snapshot comes back; then
    // wait for the published status to show the queue drained.
    handle.snapshot().await?;
    let mut updates = handle.subscribe();
    while handle.status().queued_updates > 0 {
        updates
            .changed()
            .await
            .context("Coordinator stopped while draining")?;
    }

    let snapshot = handle.snapshot().await?;
    print_snapshot(&snapshot, total);

    handle.shutdown().await?;
    task.await.context("Coordinator task failed")?;
    Ok(())
}

fn print_snapshot(snapshot: &DirectorSnapshot, total: u64) {
    println!();
    println!("{}", "=== Simulation Result ===".cyan().bold());
    println!(
        "{} Background context: {} (bound: {}, connected: {})",
        "[i]".blue(),
        snapshot.phase,
        snapshot.foreground.bound,
        snapshot.foreground.connected
    );
    println!("{} In flight: {}", "[i]".blue(), snapshot.in_flight.len());
    println!("{} Queued updates: {}", "[i]".blue(), snapshot.queued_updates);
    println!(
        "{} Waiting for network: {} ({} each)",
        "[i]".blue(),
        snapshot.persisted.len(),
        format_bytes(total)
    );
    match snapshot.resumption_scheduled {
        Some(network) => println!("{} Resumption scheduled ({:?})", "[✓]".green(), network),
        None => println!("{} No resumption scheduled", "[i]".blue()),
    }
}
