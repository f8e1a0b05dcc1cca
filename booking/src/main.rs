//! Booking worker.
//!
//! Runs job execution, the expiry sweep and the reminder scan until Ctrl+C or
//! SIGTERM. Configuration comes from the environment (see [`Config`]).
//!
//! # Usage
//!
//! ```bash
//! STORAGE_BACKEND=memory DEPOT_TRIPS_FILE=booking/fixtures/trips.json \
//!   cargo run --bin coachline
//! ```

use anyhow::Context;
use coachline_booking::{BookingApp, Config, Resources};
use coachline_core::environment::SystemClock;
use coachline_runtime::shutdown_signal;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,coachline_booking=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    tracing::info!(storage = ?config.storage, "Configuration loaded");

    if let Some(addr) = config.metrics_listen {
        coachline_runtime::metrics::install(Some(addr)).context("failed to start metrics exporter")?;
    }

    let resources = Resources::from_config(&config)
        .await
        .context("failed to initialise resources")?;
    let app = BookingApp::start(resources, &config, Arc::new(SystemClock));

    shutdown_signal().await;

    app.shutdown().await.context("shutdown did not complete cleanly")?;
    tracing::info!("Booking worker stopped");
    Ok(())
}
