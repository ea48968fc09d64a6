use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::JanusService;

const BUS_NAME: &str = "org.openbr.Janus1";
const OBJECT_PATH: &str = "/org/openbr/Janus1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("janusd starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        bus = ?config.bus,
        default_k = config.default_k,
        max_k = config.max_k,
        queue_depth = config.queue_depth,
        max_template_bytes = config.max_template_bytes,
        "configuration loaded"
    );

    let engine = engine::spawn_engine(&config).context("failed to start matching engine")?;
    let service = JanusService::new(engine, config.clone());

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("failed to claim {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "janusd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("janusd shutting down");

    Ok(())
}
