//! qmon daemon entrypoint.
//!
//! `qmon run` is the long-running single writer: it polls the roster file the
//! scraper maintains, runs one engine cycle per poll, and publishes the view
//! for the renderer. The other subcommands inspect or reset persisted state.
//!
//! ## Subcommands
//!
//! - `run`: Poll, classify, time and publish until `quit`
//! - `replay`: Feed a JSON-lines recording through a fresh engine
//! - `history`: Show one agent's events for a day
//! - `stats`: Show daily aggregates
//! - `slots`: Show the slot roster
//! - `reset`: Clear every persisted key

mod cadence;
mod console;
mod db;
mod logging;
mod notifier;
mod publisher;
mod replay;
mod source;
mod worker;

use chrono::Utc;
use clap::{Parser, Subcommand};
use qmon_core::view::format_hms;
use qmon_core::{
    day_key, load_config, AppState, KvStore, MemoryStore, MonitorConfig, MonitorEngine,
    StoragePaths,
};
use std::path::PathBuf;
use std::sync::mpsc;
use tracing::{error, info, warn};

use db::Db;
use notifier::TracingNotifier;
use publisher::{JsonFilePublisher, NullPublisher, ViewPublisher};
use source::{FileSnapshotSource, SnapshotSource};
use worker::Worker;

#[derive(Parser)]
#[command(name = "qmon")]
#[command(about = "Queue and agent status monitor")]
#[command(version)]
struct Cli {
    /// Data directory (defaults to ~/.qmon)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Configuration file (defaults to <root>/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write daily-rotated logs here
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor loop
    Run {
        /// Roster file written by the scraper
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Where to publish the grouped view
        #[arg(long)]
        view: Option<PathBuf>,

        /// Append alerts to this JSON-lines file
        #[arg(long)]
        alert_feed: Option<PathBuf>,

        /// Keep state in memory only
        #[arg(long)]
        memory: bool,

        /// Do not read control commands from stdin
        #[arg(long)]
        no_console: bool,
    },

    /// Replay recorded rosters (one JSON batch per line)
    Replay {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Publish the final view here
        #[arg(long)]
        view: Option<PathBuf>,

        /// Apply to the persisted store instead of a scratch one
        #[arg(long)]
        persist: bool,
    },

    /// Show an agent's history
    History {
        #[arg(value_name = "NAME")]
        name: String,

        /// Day as YYYY-MM-DD (defaults to today, UTC)
        #[arg(long)]
        day: Option<String>,

        /// Most recent entries to show
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Show daily aggregates
    Stats {
        /// Day as YYYY-MM-DD (defaults to today, UTC)
        #[arg(long)]
        day: Option<String>,
    },

    /// Show the slot roster
    Slots,

    /// Clear all persisted state
    Reset,
}

struct Context {
    paths: StoragePaths,
    config: MonitorConfig,
}

fn main() {
    let cli = Cli::parse();

    let paths = match cli.root.clone() {
        Some(root) => Ok(StoragePaths::with_root(root)),
        None => StoragePaths::from_home(),
    };
    let config = paths.as_ref().map_err(|err| err.to_string()).and_then(|paths| {
        let config_path = cli.config.clone().unwrap_or_else(|| paths.config_file());
        load_config(Some(&config_path)).map_err(|err| err.to_string())
    });

    let log_dir = cli
        .log_dir
        .clone()
        .or_else(|| config.as_ref().ok().and_then(|config| config.logging.dir.clone()));
    let _logging_guard = logging::init(log_dir.as_deref());

    let paths = match paths {
        Ok(paths) => paths,
        Err(err) => {
            error!(error = %err, "Failed to resolve qmon data directory");
            std::process::exit(1);
        }
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load configuration; using defaults");
            MonitorConfig::default()
        }
    };
    let ctx = Context { paths, config };

    let result = match cli.command {
        Commands::Run {
            snapshot,
            view,
            alert_feed,
            memory,
            no_console,
        } => run(&ctx, snapshot, view, alert_feed, memory, !no_console),
        Commands::Replay {
            file,
            view,
            persist,
        } => replay(&ctx, file, view, persist),
        Commands::History { name, day, limit } => history(&ctx, &name, day, limit),
        Commands::Stats { day } => stats(&ctx, day),
        Commands::Slots => slots(&ctx),
        Commands::Reset => reset(&ctx),
    };

    if let Err(err) = result {
        error!(error = %err, "qmon failed");
        std::process::exit(1);
    }
}

fn open_db(ctx: &Context) -> Result<Db, String> {
    Db::new(ctx.config.store_path(&ctx.paths))
}

fn run(
    ctx: &Context,
    snapshot: Option<PathBuf>,
    view: Option<PathBuf>,
    alert_feed: Option<PathBuf>,
    memory: bool,
    console: bool,
) -> Result<(), String> {
    let snapshot = snapshot.unwrap_or_else(|| ctx.config.snapshot_path(&ctx.paths));
    let view = view.unwrap_or_else(|| ctx.config.view_path(&ctx.paths));
    let publisher = JsonFilePublisher::new(view.clone(), StoragePaths::timers_file_for(&view));
    let notifier = match alert_feed {
        Some(path) => TracingNotifier::with_feed(&path)?,
        None => TracingNotifier::new(),
    };
    let source = FileSnapshotSource::new(snapshot);
    info!(
        snapshot = %source.path().display(),
        view = %view.display(),
        memory,
        "qmon starting"
    );

    let now = Utc::now();
    if memory {
        let engine = MonitorEngine::new(ctx.config.clone(), MemoryStore::new(), now);
        serve(engine, source, publisher, notifier, console)
    } else {
        let engine = MonitorEngine::new(ctx.config.clone(), open_db(ctx)?, now);
        serve(engine, source, publisher, notifier, console)
    }
}

fn serve<S, Src, P>(
    engine: MonitorEngine<S>,
    source: Src,
    publisher: P,
    notifier: TracingNotifier,
    console: bool,
) -> Result<(), String>
where
    S: KvStore,
    Src: SnapshotSource,
    P: ViewPublisher,
{
    let (tx, rx) = mpsc::channel();
    if console {
        console::spawn(tx.clone()).map_err(|err| format!("Failed to start console: {}", err))?;
    }

    Worker::new(engine, source, publisher, notifier).run(rx);
    drop(tx);
    info!("qmon stopped");
    Ok(())
}

fn replay(
    ctx: &Context,
    file: PathBuf,
    view: Option<PathBuf>,
    persist: bool,
) -> Result<(), String> {
    let mut publisher: Box<dyn ViewPublisher> = match view {
        Some(view) => {
            let timers = StoragePaths::timers_file_for(&view);
            Box::new(JsonFilePublisher::new(view, timers))
        }
        None => Box::new(NullPublisher),
    };

    let now = Utc::now();
    let summary = if persist {
        let mut engine = MonitorEngine::new(ctx.config.clone(), open_db(ctx)?, now);
        replay::replay_file(&mut engine, &file, publisher.as_mut())?
    } else {
        let mut engine = MonitorEngine::new(ctx.config.clone(), MemoryStore::new(), now);
        replay::replay_file(&mut engine, &file, publisher.as_mut())?
    };

    let json = serde_json::to_string_pretty(&summary)
        .map_err(|err| format!("Failed to serialize replay summary: {}", err))?;
    println!("{}", json);
    Ok(())
}

fn load_state(ctx: &Context) -> Result<AppState, String> {
    let db = open_db(ctx)?;
    let (state, report) = AppState::load(&db, &ctx.config);
    if !report.is_clean() {
        eprintln!(
            "warning: defaults used for malformed={:?} unavailable={:?}",
            report.malformed, report.unavailable
        );
    }
    Ok(state)
}

fn history(ctx: &Context, name: &str, day: Option<String>, limit: usize) -> Result<(), String> {
    let state = load_state(ctx)?;
    let day = day.unwrap_or_else(|| day_key(Utc::now()));
    let events = state.ledger.events(&day, name);
    if events.is_empty() {
        println!("No history for {} on {}", name, day);
        return Ok(());
    }

    let skip = events.len().saturating_sub(limit);
    for entry in events.into_iter().skip(skip) {
        let line = serde_json::to_string(entry)
            .map_err(|err| format!("Failed to serialize history entry: {}", err))?;
        println!("{}", line);
    }
    Ok(())
}

fn stats(ctx: &Context, day: Option<String>) -> Result<(), String> {
    let state = load_state(ctx)?;
    let day = day.unwrap_or_else(|| day_key(Utc::now()));
    let Some(agents) = state.ledger.aggregates_for_day(&day) else {
        println!("No aggregates for {}", day);
        return Ok(());
    };

    let hms = |ms: u64| format_hms(i64::try_from(ms).unwrap_or(i64::MAX));
    println!(
        "{:<28} {:>9} {:>9} {:>9} {:>9} {:>9}",
        "agent", "call", "chat", "postcall", "rona", "total"
    );
    for (name, aggregate) in agents {
        println!(
            "{:<28} {:>9} {:>9} {:>9} {:>9} {:>9}",
            name,
            hms(aggregate.call_ms),
            hms(aggregate.chat_ms),
            hms(aggregate.postcall_ms),
            hms(aggregate.rona_ms),
            hms(aggregate.total_ms())
        );
    }
    Ok(())
}

fn slots(ctx: &Context) -> Result<(), String> {
    let state = load_state(ctx)?;
    println!(
        "{:>4}  {:<28} {:>6}  {:<25}  {:<25}",
        "slot", "agent", "calls", "last call", "last seen"
    );
    for entry in state.slots.entries() {
        let last_call = entry
            .last_call_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>4}  {:<28} {:>6}  {:<25}  {:<25}",
            entry.slot,
            entry.name,
            entry.total_calls,
            last_call,
            entry.last_seen.to_rfc3339()
        );
    }
    println!("next slot: {}", state.slots.counter());
    Ok(())
}

fn reset(ctx: &Context) -> Result<(), String> {
    let mut db = open_db(ctx)?;
    let keys = db.list_keys()?;
    db.clear().map_err(|err| err.to_string())?;
    info!(keys = keys.len(), "Cleared persisted state");
    println!("Cleared {} keys", keys.len());
    Ok(())
}
