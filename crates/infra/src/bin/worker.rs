//! Forecast maintenance worker.
//!
//! Keeps every configured target's model fresh and records drift checks.
//! Configuration comes from the TOML file named by `SIPREMS_CONFIG` (if set)
//! plus `SIPREMS_*` overrides.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use siprems_ai::{ForecastService, SystemClock};
use siprems_infra::sources::PostgresSources;
use siprems_infra::{AppConfig, FsArtifactStore, JsonLinesDriftLog, MaintenanceRunner};

fn main() -> Result<()> {
    let config_path = std::env::var_os("SIPREMS_CONFIG").map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;

    siprems_observability::init_with(&config.logging.filter, config.logging.format);
    if let Some(path) = &config_path {
        info!(path = %path.display(), "configuration loaded");
    }

    let url = config
        .database
        .url
        .as_deref()
        .context("database.url (or SIPREMS_DATABASE_URL) is required")?;
    let sources = Arc::new(
        PostgresSources::connect(url, config.database.max_connections)
            .context("connecting to postgres")?
            .with_recent_sales_days(config.forecast.recommendation.history_window_days as i32),
    );

    let store = Arc::new(
        FsArtifactStore::open(&config.storage.artifact_dir).context("opening artifact store")?,
    );
    let drift_log = Arc::new(
        JsonLinesDriftLog::open(&config.storage.drift_log_path).context("opening drift log")?,
    );
    let clock = SystemClock::with_offset_hours(config.maintenance.utc_offset_hours)
        .context("maintenance.utc_offset_hours out of range")?;

    let service = ForecastService::builder(sources.clone(), store)
        .with_events(sources.clone())
        .with_products(sources)
        .with_drift_log(drift_log)
        .with_clock(Arc::new(clock))
        .with_config(config.forecast.clone())
        .build()
        .context("building forecast service")?;

    let targets = config.maintenance.target_ids()?;
    if targets.is_empty() {
        warn!("no maintenance targets configured; the worker will idle");
    }

    let handle = MaintenanceRunner::try_from(&config.maintenance)
        .context("invalid maintenance settings")?
        .spawn("siprems-maintenance", targets, Arc::new(service))
        .context("spawning maintenance runner")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("waiting for shutdown signal")?;

    info!("shutdown requested");
    handle.shutdown();
    Ok(())
}
