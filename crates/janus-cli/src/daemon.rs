//! Client side of the `org.openbr.Janus1` interface.

use anyhow::{Context, Result};

// `#[zbus::proxy]` generates `JanusProxy` (async) and `JanusProxyBlocking`.
#[zbus::proxy(
    interface = "org.openbr.Janus1",
    default_service = "org.openbr.Janus1",
    default_path = "/org/openbr/Janus1"
)]
pub trait Janus {
    async fn enroll(&self, id: u64, flat_template: Vec<u8>) -> zbus::Result<u64>;
    async fn verify(&self, a: Vec<u8>, b: Vec<u8>) -> zbus::Result<f64>;
    async fn search(&self, query: Vec<u8>, k: u32) -> zbus::Result<Vec<(u64, f64)>>;
    async fn compare_all(
        &self,
        target_ids: Vec<u64>,
        query_ids: Vec<u64>,
    ) -> zbus::Result<(Vec<u64>, Vec<u64>, Vec<f64>)>;
    async fn gallery_size(&self) -> zbus::Result<u64>;
    async fn export_gallery(&self) -> zbus::Result<Vec<u8>>;
    async fn status(&self) -> zbus::Result<String>;
}

/// Connect to the daemon on the bus named by `JANUS_BUS` (session unless "system").
pub async fn connect() -> Result<zbus::Connection> {
    let system = std::env::var("JANUS_BUS")
        .map(|v| v.trim().eq_ignore_ascii_case("system"))
        .unwrap_or(false);
    let connection = if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    };
    connection.context("failed to connect to the message bus")
}
