//! # tacho
//!
//! Driving-time compliance server. Wires settings, telemetry, storage and
//! the compliance engine together and serves them over HTTP.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use tacho_core::location::{NoopParkingLocator, ParkingLocator};
use tacho_engine::{ComplianceEngine, EngineConfig, HttpParkingLocator};
use tacho_server::{HandlerState, ServerConfig};
use tacho_settings::{LocationProvider, TachoSettings};
use tacho_store::{Database, DrivingSessionRepo, ParkingRepo, SqliteParkingLocator};
use tacho_telemetry::{MetricsRecorder, TelemetryConfig, TelemetryGuard};

/// EC 561/2006 driving-time compliance server.
#[derive(Parser, Debug)]
#[command(name = "tacho", about = "Driving-time compliance server")]
struct Cli {
    /// Settings file (defaults to `~/.tacho/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Load the bundled truck-park catalogue into the database.
    SeedParking,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings_file = cli.settings.unwrap_or_else(tacho_settings::settings_path);
    let settings = tacho_settings::load_settings_from_path(&settings_file)
        .with_context(|| format!("Failed to load settings from {}", settings_file.display()))?;

    let telemetry = Arc::new(tacho_telemetry::init_telemetry(telemetry_config(&settings)));
    tracing::info!(settings = %settings_file.display(), "settings loaded");

    let db_path = PathBuf::from(&settings.database.path);
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings, db, telemetry).await,
        Command::SeedParking => seed_parking(db),
    }
}

fn telemetry_config(settings: &TachoSettings) -> TelemetryConfig {
    let t = &settings.telemetry;
    TelemetryConfig {
        log_level: t.log_level.parse().unwrap_or(Level::INFO),
        module_levels: Vec::new(),
        log_to_sqlite: t.log_to_sqlite,
        log_db_path: PathBuf::from(&t.log_db_path),
        metrics_enabled: t.metrics_enabled,
        metrics_db_path: PathBuf::from(&t.metrics_db_path),
    }
}

fn engine_config(settings: &TachoSettings) -> EngineConfig {
    let c = &settings.compliance;
    EngineConfig {
        utc_offset_minutes: c.utc_offset_minutes,
        parking_lookahead_min: c.parking_lookahead_min,
        parking_radius_km: c.parking_radius_km,
        locator_timeout: Duration::from_millis(settings.location.timeout_ms),
        history_default_days: c.history_default_days,
        history_max_days: c.history_max_days,
    }
}

fn parking_locator(settings: &TachoSettings, db: &Database) -> Arc<dyn ParkingLocator> {
    let location = &settings.location;
    match location.provider {
        LocationProvider::Local => Arc::new(SqliteParkingLocator::new(db.clone())),
        LocationProvider::Http => Arc::new(HttpParkingLocator::new(
            location.base_url.clone(),
            Duration::from_millis(location.timeout_ms),
        )),
        LocationProvider::Disabled => Arc::new(NoopParkingLocator),
    }
}

async fn serve(settings: TachoSettings, db: Database, telemetry: Arc<TelemetryGuard>) -> Result<()> {
    let metrics = telemetry.metrics();
    let store = Arc::new(DrivingSessionRepo::new(db.clone()));
    let engine = ComplianceEngine::new(
        store,
        parking_locator(&settings, &db),
        engine_config(&settings),
    )
    .with_metrics(metrics.clone());
    tracing::info!(locator = engine.locator_name(), "compliance engine ready");

    let snapshots = metrics.map(|m| {
        spawn_metrics_snapshots(
            m,
            Duration::from_secs(settings.telemetry.metrics_snapshot_interval_secs.max(1)),
            settings.telemetry.metrics_retention_days,
        )
    });

    let state = Arc::new(HandlerState::new(db, Arc::new(engine)).with_telemetry(telemetry));
    let config = ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        request_timeout_secs: settings.server.request_timeout_secs,
    };
    let handle = tacho_server::start(config, state)
        .await
        .context("Failed to start server")?;
    tracing::info!(port = handle.port, "tacho server ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;
    tracing::info!("shutting down");

    handle.shutdown().await;
    if let Some(task) = snapshots {
        task.abort();
    }
    Ok(())
}

/// Periodically persist metric values and drop rows past retention.
fn spawn_metrics_snapshots(
    metrics: Arc<MetricsRecorder>,
    every: Duration,
    retention_days: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match metrics.snapshot() {
                Ok(rows) => tracing::debug!(rows, "metrics snapshot written"),
                Err(e) => tracing::warn!(error = %e, "metrics snapshot failed"),
            }
            if let Err(e) = metrics.prune(retention_days) {
                tracing::warn!(error = %e, "metrics prune failed");
            }
        }
    })
}

fn seed_parking(db: Database) -> Result<()> {
    let report = ParkingRepo::new(db.clone())
        .seed_defaults()
        .context("Failed to seed truck parks")?;
    tracing::info!(
        inserted = report.inserted,
        skipped = report.skipped,
        total = report.total,
        "truck parks seeded"
    );
    println!(
        "seeded {} truck parks ({} already present, {} total) into {}",
        report.inserted,
        report.skipped,
        report.total,
        db.path().display()
    );
    Ok(())
}
