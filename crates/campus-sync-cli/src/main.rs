//! campus-sync - keeps campus API resources cached and fresh from the terminal.
//!
//! `campus-sync run` signs in with `CAMPUS_SYNC_TOKEN`, refreshes every
//! configured domain on its interval and prints a line whenever a resource
//! changes state. Press Enter to refresh now, Ctrl-C to quit.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use campus_sync_core::cache::spawn_sweeper;
use campus_sync_core::lifecycle::spawn_listener;
use campus_sync_core::sync::Freshness;
use campus_sync_core::{
    CacheManager, Fetcher, HttpFetcher, LifecycleEvent, RefreshTask, SyncConfig, SyncController,
    SyncOrchestrator, TaskHandle, TaskStatus,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const TOKEN_ENV: &str = "CAMPUS_SYNC_TOKEN";
const CONFIG_ENV: &str = "CAMPUS_SYNC_CONFIG";
const LOG_FILE_PREFIX: &str = "campus-sync.log";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, and additionally to a daily-rolling file when `log_dir`
/// is set. The returned guard must live until exit so buffered lines are flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=campus_sync_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn load_config() -> Result<SyncConfig> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => SyncConfig::load_from(&PathBuf::from(path)),
        None => SyncConfig::load(),
    }
}

fn usage() {
    eprintln!("Usage: campus-sync [COMMAND]\n");
    eprintln!("Commands:");
    eprintln!("  run      Keep every configured resource fresh (default)");
    eprintln!("  status   Show what is cached and how old it is");
    eprintln!("  clear    Remove every cached resource");
    eprintln!("\nEnvironment:");
    eprintln!("  {TOKEN_ENV}   API bearer token; without it only cached data is shown");
    eprintln!("  {CONFIG_ENV}  Config file path (default: user config dir)");
    eprintln!("  RUST_LOG             Log filter (default: warn)");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("run");
    if matches!(command, "-h" | "--help" | "help") {
        usage();
        return Ok(());
    }

    let config = load_config()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    let cache_dir = config.cache_dir()?;
    let cache = Arc::new(
        CacheManager::open(&cache_dir).with_memory_capacity(config.memory_capacity),
    );

    match command {
        "run" => run(config, cache).await,
        "status" => status(&config, &cache).await,
        "clear" => {
            cache.clear_all().await;
            println!("Cleared cache at {}", cache_dir.display());
            Ok(())
        }
        other => {
            usage();
            bail!("Unknown command: {other}")
        }
    }
}

async fn run(config: SyncConfig, cache: Arc<CacheManager>) -> Result<()> {
    info!(domains = config.domains.len(), "campus-sync starting");

    let token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty());
    let mut http = HttpFetcher::new(config.api_base_url.clone(), config.request_timeout())
        .context("Failed to build HTTP client")?;
    if let Some(token) = &token {
        http.set_token(token.trim());
    }
    let fetcher: Arc<dyn Fetcher> = Arc::new(http);

    let sweeper = spawn_sweeper(Arc::clone(&cache), config.sweep_interval());

    let mut controller = SyncController::new(Arc::clone(&cache));
    let mut printers = Vec::new();
    for domain in &config.domains {
        let mut builder = SyncOrchestrator::builder(domain.name.clone(), Arc::clone(&cache))
            .min_refresh_interval(config.min_refresh_interval());
        for resource in &domain.resources {
            let handle = builder.register(RefreshTask::<Value>::json(
                resource.key.clone(),
                resource.ttl(),
                Arc::clone(&fetcher),
                resource.path.clone(),
            ));
            printers.push(spawn_status_printer(domain.name.clone(), handle));
        }
        let orchestrator = builder
            .build()
            .with_context(|| format!("Invalid domain '{}'", domain.name))?;
        controller.add_domain(Arc::new(orchestrator), domain.interval());
    }
    let controller = Arc::new(controller);

    let (events, events_rx) = mpsc::channel(8);
    let listener = spawn_listener(Arc::clone(&controller), events_rx);

    if token.is_some() {
        events.send(LifecycleEvent::SignedIn).await?;
    } else {
        warn!("{TOKEN_ENV} not set, showing cached data only");
        status(&config, &cache).await?;
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => match line {
                Ok(Some(_)) => events.send(LifecycleEvent::Foreground).await?,
                // stdin closed, keep running until Ctrl-C
                Ok(None) => {
                    tokio::signal::ctrl_c().await?;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    tokio::signal::ctrl_c().await?;
                    break;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    info!("Shutting down");
    drop(events);
    if let Err(e) = listener.await {
        warn!(error = %e, "Lifecycle listener ended abnormally");
    }
    controller.shutdown().await;
    sweeper.shutdown().await;
    for printer in printers {
        printer.abort();
    }

    let stats = cache.stats();
    info!(
        memory_hits = stats.memory_hits,
        disk_hits = stats.disk_hits,
        misses = stats.misses,
        disk_errors = stats.disk_errors,
        "campus-sync stopped"
    );
    Ok(())
}

/// Print each cached resource and its age.
async fn status(config: &SyncConfig, cache: &CacheManager) -> Result<()> {
    for domain in &config.domains {
        println!("{}", domain.name);
        for resource in &domain.resources {
            match cache.get_cached::<Value>(&resource.key).await {
                Ok(cached) => println!(
                    "  {:<24} {}, cached {}",
                    resource.key,
                    describe(&cached.data),
                    cached.age_display()
                ),
                Err(_) => println!("  {:<24} no data", resource.key),
            }
        }
    }
    Ok(())
}

fn spawn_status_printer(domain: String, handle: TaskHandle<Value>) -> JoinHandle<()> {
    let mut rx = handle.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let line = status_line(&domain, handle.name(), &rx.borrow_and_update());
            println!("{line}");
        }
    })
}

fn status_line(domain: &str, name: &str, status: &TaskStatus<Value>) -> String {
    let state = match status.freshness() {
        Freshness::Fresh => "fresh",
        Freshness::Stale => "stale",
        Freshness::Empty => "no data",
    };
    let mut line = format!("[{domain}/{name}] {state}");
    if let Some(value) = &status.last_value {
        line.push_str(&format!(", {}", describe(value)));
    }
    if let Some(updated) = status.last_updated {
        let local = updated.with_timezone(&chrono::Local);
        line.push_str(&format!(", updated {}", local.format("%H:%M:%S")));
    }
    if let Some(err) = &status.last_error {
        line.push_str(&format!(" ({err})"));
    }
    line
}

fn describe(value: &Value) -> String {
    match value {
        Value::Array(items) => format!("{} items", items.len()),
        Value::Object(fields) => format!("{} fields", fields.len()),
        Value::Null => "empty".to_string(),
        _ => "1 value".to_string(),
    }
}
