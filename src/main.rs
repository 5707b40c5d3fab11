// Main entry point - Dependency injection and process startup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::application::dispatcher::Dispatcher;
use crate::application::line_reader::{shared, SharedReader};
use crate::application::monitor::{DeviceMonitor, Supervisor};
use crate::application::monitoring_service::MonitoringService;
use crate::application::simulator::run_simulator;
use crate::infrastructure::audit_log::{AuditEvent, AuditLog};
use crate::infrastructure::collector_client::CollectorClient;
use crate::infrastructure::config::{load_config, AppConfig, DEFAULT_CONFIG_PATH};
use crate::infrastructure::serial_reader;
use crate::infrastructure::sqlite_repository::SqliteRepository;
use crate::presentation::app_state::AppState;
use crate::presentation::routes::router;

#[derive(Parser, Debug)]
#[command(name = "water-quality-monitor", version, about = "Water quality sensor ingestion and collection")]
struct Cli {
    /// Configuration file, extension optional
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the serial devices and forward readings to the collector
    Ingest,
    /// Serve the collector HTTP API
    Collector,
    /// Post random readings for simulated devices
    Simulate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Ingest => run_ingest(config).await,
        Command::Collector => run_collector(config).await,
        Command::Simulate => run_simulate(config).await,
    }
}

async fn run_ingest(config: AppConfig) -> anyhow::Result<()> {
    let audit = AuditLog::open(config.audit_log.path.clone()).await?;
    let client = CollectorClient::new(&config.collector)?;
    let dispatcher = Dispatcher::new(client, audit.clone());

    // One reader per physical link, shared by every device wired to it
    let mut links: BTreeMap<String, SharedReader> = BTreeMap::new();
    let mut monitors = Vec::new();

    for device_config in config.monitored_devices() {
        let link = device_config.link(&config.serial);
        let reader = match links.get(&link.port) {
            Some(reader) => reader.clone(),
            None => {
                audit
                    .record(AuditEvent::SessionStarted {
                        port: link.port.clone(),
                        baud_rate: link.baud_rate,
                    })
                    .await
                    .context("Failed to write audit log")?;
                let reader = shared(serial_reader::connect(&link).await);
                links.insert(link.port.clone(), reader.clone());
                reader
            }
        };

        monitors.push(DeviceMonitor::new(
            device_config.device(),
            reader,
            dispatcher.clone(),
            audit.clone(),
            config.monitor.interval(),
        ));
    }

    tracing::info!(
        devices = monitors.len(),
        links = links.len(),
        audit_log = %audit.path().display(),
        "Starting ingestion"
    );

    let supervisor = Supervisor::start(
        monitors,
        links.into_values().collect(),
        audit,
        config.monitor.stagger(),
    )
    .await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down ingestion");

    supervisor
        .shutdown()
        .await
        .context("Failed to close monitoring session")
}

async fn run_collector(config: AppConfig) -> anyhow::Result<()> {
    let offset = config.display.offset()?;
    let repository = Arc::new(SqliteRepository::open(&config.database.path)?);
    let monitoring_service = MonitoringService::new(repository, offset);

    if let Some(seed) = &config.auth.seed_user {
        monitoring_service
            .seed_user(&seed.username, &seed.password)
            .await
            .context("Failed to seed user")?;
    }

    let state = Arc::new(AppState { monitoring_service });

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!(
        addr = %config.server.bind,
        database = %config.database.path,
        "Starting collector"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
        })
        .await
        .context("Collector server failed")
}

async fn run_simulate(config: AppConfig) -> anyhow::Result<()> {
    let client = CollectorClient::new(&config.collector)?;
    let simulator = config.simulator.clone();
    let (shutdown, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move { run_simulator(&simulator, client, shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Stopping simulator");

    let _ = shutdown.send(true);
    task.await.context("Simulator task failed")
}
