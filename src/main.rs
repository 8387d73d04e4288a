//! hostwatch daemon and history tools
//!
//! Run with: hostwatch run --config /etc/hostwatch/config.yaml
//!
//! Environment variables:
//! - HOSTWATCH_CONFIG: Configuration file used when `--config` is absent
//! - RUST_LOG: Log filter, overrides `logging.level`

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use hostwatch::api::{run_server, AppState};
use hostwatch::config::{self, AppConfig, LogFormat};
use hostwatch::monitors::read_all;
use hostwatch::monitors::system::SystemSource;
use hostwatch::notify::HttpDispatcher;
use hostwatch::scheduler::{PruneWorker, Scheduler};
use hostwatch::store::{hours_ago, latest_active, open_store, HistoryFilter};
use hostwatch::{AlertRecord, AlertStatus, MonitorKind};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "hostwatch")]
#[command(version, about = "Lightweight host monitoring daemon with debounced threshold alerts")]
struct Cli {
    /// Configuration file (defaults to the standard search path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring daemon (default)
    Run,

    /// Validate the configuration and print the effective monitors
    Validate,

    /// Show alerts that are currently active according to history
    Alerts,

    /// Show alert history, most recent first
    History {
        /// Only this monitor kind (cpu, memory, disk, ping)
        #[arg(short, long)]
        monitor: Option<MonitorKind>,

        /// Only this status (active, resolved)
        #[arg(short, long)]
        status: Option<AlertStatus>,

        /// Only records from the last N hours
        #[arg(long)]
        since_hours: Option<i64>,

        /// Maximum number of records
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Sample every enabled monitor once and print the current values
    Metrics,

    /// Apply the retention policy to stored history now
    Prune,
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("hostwatch={level},tower_http={level}", level = config.logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let app_config = config::load(cli.config.as_deref())?;
    init_logging(&app_config);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(cli.config, app_config).await,
        Commands::Validate => {
            validate(&app_config);
            Ok(())
        }
        Commands::Alerts => {
            let store = open_store(&app_config.storage)?;
            let records = store.list(&HistoryFilter::all())?;
            print_records(&latest_active(&records));
            Ok(())
        }
        Commands::History {
            monitor,
            status,
            since_hours,
            limit,
        } => {
            let mut filter = HistoryFilter::all().limit(limit);
            if let Some(kind) = monitor {
                filter = filter.with_monitor(kind);
            }
            if let Some(status) = status {
                filter = filter.with_status(status);
            }
            if let Some(hours) = since_hours {
                let since = hours_ago(Utc::now(), hours)
                    .ok_or_else(|| format!("--since-hours out of range: {}", hours))?;
                filter = filter.since(since);
            }

            let store = open_store(&app_config.storage)?;
            print_records(&store.list(&filter)?);
            Ok(())
        }
        Commands::Metrics => {
            let source = SystemSource::new();
            for reading in read_all(&source, &app_config.monitors).await {
                let label = match &reading.target {
                    Some(target) => format!("{}[{}]", reading.kind, target),
                    None => reading.kind.to_string(),
                };
                let state = match (&reading.value, reading.breached()) {
                    (Err(_), _) => "ERROR",
                    (Ok(_), true) => "BREACH",
                    (Ok(_), false) => "OK",
                };
                println!("{:<24} {:<7} {}", label, state, reading.describe());
            }
            Ok(())
        }
        Commands::Prune => {
            let store = open_store(&app_config.storage)?;
            let removed = PruneWorker::new(store, &app_config.storage.pruning).run_once(Utc::now())?;
            println!("Removed {} alert records", removed);
            Ok(())
        }
    }
}

async fn run(config_path: Option<PathBuf>, app_config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let hostname = SystemSource::hostname();
    match &app_config.source {
        Some(path) => tracing::info!("Configuration: {}", path.display()),
        None => tracing::info!("Configuration: built-in defaults"),
    }
    tracing::info!("Host: {}", hostname);
    for monitor in app_config.enabled_monitors() {
        tracing::info!(
            "  {}: every {}s, threshold {}{}, {} consecutive breaches",
            monitor.kind,
            monitor.interval.as_secs(),
            monitor.threshold,
            monitor.kind.unit(),
            monitor.alert_count
        );
    }

    let store = open_store(&app_config.storage)?;
    let grace = app_config.scheduler.shutdown_grace;
    let api_config = app_config.api.clone();

    let scheduler = Scheduler::start(
        app_config,
        Arc::new(SystemSource::new()),
        Arc::new(HttpDispatcher::new()),
        Arc::clone(&store),
        hostname.clone(),
    )
    .await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let api = if api_config.enabled {
        let state = Arc::new(AppState {
            tracker: scheduler.tracker(),
            store,
            config: scheduler.config_handle(),
            hostname,
            started_at: Utc::now(),
        });
        let mut stop = stop_rx.clone();
        Some(tokio::spawn(run_server(api_config.bind, state, async move {
            let _ = stop.changed().await;
        })))
    } else {
        None
    };

    wait_for_signals(&scheduler, config_path).await;

    let _ = stop_tx.send(true);
    scheduler.shutdown(grace).await;
    if let Some(handle) = api {
        match handle.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Status API failed"),
            Err(e) => tracing::error!(error = %e, "Status API task failed"),
            Ok(Ok(())) => {}
        }
    }

    tracing::info!("hostwatch stopped");
    Ok(())
}

/// Reload on SIGHUP; return on Ctrl-C or SIGTERM
#[cfg(unix)]
async fn wait_for_signals(scheduler: &Scheduler, config_path: Option<PathBuf>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).expect("Failed to install SIGHUP handler");
    let mut terminate = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = terminate.recv() => break,
            _ = hangup.recv() => {
                tracing::info!("SIGHUP received, reloading configuration");
                match config::load(config_path.as_deref()) {
                    Ok(next) => scheduler.reload(next).await,
                    Err(e) => tracing::error!(error = %e, "Reload failed, keeping current configuration"),
                }
            }
        }
    }

    tracing::info!("Shutdown signal received, stopping monitors...");
}

#[cfg(not(unix))]
async fn wait_for_signals(_scheduler: &Scheduler, _config_path: Option<PathBuf>) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, stopping monitors...");
}

fn validate(config: &AppConfig) {
    match &config.source {
        Some(path) => println!("Configuration OK: {}", path.display()),
        None => println!("No configuration file found, built-in defaults are valid"),
    }

    for monitor in &config.monitors {
        let targets: Vec<String> = monitor
            .targets()
            .into_iter()
            .map(|t| t.unwrap_or_else(|| "-".to_string()))
            .collect();
        println!(
            "  {:<7} {:<8} every {:>4}s  threshold {:>7.2}{:<2} count {}  resolve after {}s  targets [{}]",
            monitor.kind.as_str(),
            if monitor.enabled { "enabled" } else { "disabled" },
            monitor.interval.as_secs(),
            monitor.threshold,
            monitor.kind.unit(),
            monitor.alert_count,
            monitor.resolve_after.as_secs(),
            targets.join(", ")
        );
    }

    println!(
        "  storage: {:?} at {}",
        config.storage.kind,
        config.storage.path.display()
    );
    for channel in &config.notifications {
        println!(
            "  channel: {} ({}){}",
            channel,
            channel.kind.type_name(),
            if channel.enabled { "" } else { " disabled" }
        );
    }
}

fn print_records(records: &[AlertRecord]) {
    if records.is_empty() {
        println!("No alerts");
        return;
    }

    for record in records {
        let target = record
            .sub_target
            .as_deref()
            .map(|t| format!("[{}]", t))
            .unwrap_or_default();
        println!(
            "{}  {:<8} {}{} {}  value {:.2} / {:.2}  alert {}",
            record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            record.status.as_str(),
            record.monitor_kind,
            target,
            record.source.as_str(),
            record.last_value,
            record.threshold,
            record.alert_id
        );
    }
}
