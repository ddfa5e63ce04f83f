use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use settle_core::{Clock, SettleConfig, SettleError, SystemClock};
use settle_queue::{Enqueuer, JobStore, Reaper, SqliteStore, Worker};
use tracing::{info, warn};

mod sink;

#[derive(Parser)]
#[command(name = "settle", version, about = "Debounced jobs with at-least-once dispatch")]
struct Cli {
    /// Config file (default: $SETTLE_CONFIG, then ~/.settle/settle.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Override `database.path`.
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run workers and the reaper until Ctrl-C.
    Run {
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
    /// Debounce a JSON payload under `id`.
    Enqueue {
        id: String,
        payload: String,
        /// Defaults to `queue.default_delay_ms`.
        #[arg(long)]
        delay_ms: Option<u64>,
    },
    /// Show a job's record and state.
    Inspect { id: String },
    /// Show queue depth.
    Status,
    /// Requeue expired claims and purge old records once.
    Purge,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "settle_cli=info,settle_queue=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > SETTLE_CONFIG env > ~/.settle/settle.toml
    let config_path = cli.config.clone().or_else(|| std::env::var("SETTLE_CONFIG").ok());
    let mut config = load_config(config_path.as_deref())?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    let store: Arc<dyn JobStore> = Arc::new(SqliteStore::open(db_path)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Command::Run { workers } => run(store, clock, &config, workers).await?,
        Command::Enqueue {
            id,
            payload,
            delay_ms,
        } => {
            let value: serde_json::Value =
                serde_json::from_str(&payload).context("payload must be valid JSON")?;
            let delay = delay_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.queue.default_delay());
            let due = Enqueuer::new(store, clock)
                .enqueue_debounced(&id, &value, delay)
                .await?;
            println!("{}", serde_json::json!({ "id": id, "due": due }));
        }
        Command::Inspect { id } => {
            let now = clock.now_ms();
            let record = store.get(&id, now).await?;
            let state = store.state(&id, now).await?;
            if record.is_none() && state.is_none() {
                anyhow::bail!("job not found: {id}");
            }
            let payload = record
                .as_ref()
                .and_then(|r| serde_json::from_str::<serde_json::Value>(&r.payload).ok());
            let out = serde_json::json!({
                "id": id,
                "state": state,
                "due": record.as_ref().map(|r| r.due),
                "retries": record.as_ref().map(|r| r.retries),
                "expires_at": record.as_ref().and_then(|r| r.expires_at),
                "payload": payload,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Status => {
            let depth = store.depth(clock.now_ms()).await?;
            println!("{}", serde_json::to_string_pretty(&depth)?);
        }
        Command::Purge => {
            let report = Reaper::new(store, clock, config.queue.clone()).sweep().await?;
            println!(
                "{}",
                serde_json::json!({ "requeued": report.requeued, "purged": report.purged })
            );
        }
    }
    Ok(())
}

/// Spawn `workers` worker loops plus one reaper on a shared store handle and
/// block until Ctrl-C, then wait for every task to wind down.
async fn run(
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    config: &SettleConfig,
    workers: usize,
) -> anyhow::Result<()> {
    if workers == 0 {
        anyhow::bail!("--workers must be at least 1");
    }
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sink = Arc::new(sink::LogSink);

    let mut tasks = Vec::with_capacity(workers + 1);
    let reaper = Reaper::new(Arc::clone(&store), Arc::clone(&clock), config.queue.clone());
    tasks.push(tokio::spawn(reaper.run(shutdown_rx.clone())));
    for _ in 0..workers {
        let worker = Worker::new(
            Arc::clone(&store),
            sink.clone(),
            Arc::clone(&clock),
            config.queue.clone(),
        );
        info!(worker_id = %worker.id(), "spawning worker");
        tasks.push(tokio::spawn(worker.run(shutdown_rx.clone())));
    }

    info!(workers, db = %config.database.path, "settle running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if let Err(e) = task.await {
            warn!("task ended abnormally: {e}");
        }
    }
    Ok(())
}

/// Unreadable config falls back to defaults. A config that parses but holds
/// a bad value is an error.
fn load_config(path: Option<&str>) -> anyhow::Result<SettleConfig> {
    match SettleConfig::load(path) {
        Ok(c) => Ok(c),
        Err(e @ SettleError::InvalidConfig(_)) => Err(e.into()),
        Err(e) => {
            warn!("config load failed ({e}), using defaults");
            Ok(SettleConfig::default())
        }
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
