use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod controller;
mod dbus_interface;
mod engine;

const BUS_NAME: &str = "org.rollcall.Attendance1";
const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env();

    let store = rollcall_core::seed::load_store(config.roster_path.as_deref())
        .context("failed to load roster")?;
    tracing::info!(sections = store.sections().len(), "roster loaded");

    let source = engine::open_source(&config).context("failed to open still source")?;
    let engine = engine::spawn_engine(source, config.warmup_frames)?;

    if config.api_key.is_none() {
        tracing::warn!("no API key configured; every analysis will fall back to manual marking");
    }
    let recognizer = rollcall_vision::GeminiRecognizer::new(config.recognition())
        .context("failed to build recognition client")?;
    tracing::info!(model = %config.model, "recognition client ready");

    let controller = controller::Controller::new(Arc::new(store), engine, Arc::new(recognizer));
    let service = dbus_interface::AttendanceService::new(controller);

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
