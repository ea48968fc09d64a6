use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use janus_core::{BatchComparison, MatchError, TemplateId};
use zbus::interface;

/// D-Bus interface for the Janus matching daemon.
///
/// Bus name: org.openbr.Janus1
/// Object path: /org/openbr/Janus1
pub struct JanusService {
    engine: EngineHandle,
    config: Config,
}

impl JanusService {
    pub fn new(engine: EngineHandle, config: Config) -> Self {
        Self { engine, config }
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::Match(MatchError::NonFinite { .. } | MatchError::MatrixShape { .. })
        | EngineError::Spawn(_)
        | EngineError::ChannelClosed => zbus::fdo::Error::Failed(err.to_string()),
        EngineError::Match(_)
        | EngineError::Flat(_)
        | EngineError::Store(_)
        | EngineError::UnknownTemplate(_) => zbus::fdo::Error::InvalidArgs(err.to_string()),
    }
}

/// `(target_ids, query_ids, row-major matrix)` as sent over the bus.
fn batch_reply(batch: BatchComparison) -> (Vec<u64>, Vec<u64>, Vec<f64>) {
    (
        batch.target_ids.into_iter().map(|id| id.0).collect(),
        batch.query_ids.into_iter().map(|id| id.0).collect(),
        batch.matrix.as_slice().iter().map(|&s| f64::from(s)).collect(),
    )
}

#[interface(name = "org.openbr.Janus1")]
impl JanusService {
    /// Add a flat template to the gallery. Returns the new gallery size.
    async fn enroll(&self, id: u64, flat_template: Vec<u8>) -> zbus::fdo::Result<u64> {
        tracing::info!(id, bytes = flat_template.len(), "enroll requested");
        let result = self
            .engine
            .enroll(TemplateId(id), flat_template)
            .await
            .map_err(to_fdo)?;
        Ok(result.gallery_size as u64)
    }

    /// Similarity between two flat templates.
    async fn verify(&self, a: Vec<u8>, b: Vec<u8>) -> zbus::fdo::Result<f64> {
        tracing::debug!(a = a.len(), b = b.len(), "verify requested");
        let similarity = self.engine.verify(a, b).await.map_err(to_fdo)?;
        Ok(f64::from(similarity))
    }

    /// Top-k gallery matches for a flat query, best first. `k = 0` uses the configured default.
    async fn search(&self, query: Vec<u8>, k: u32) -> zbus::fdo::Result<Vec<(u64, f64)>> {
        let k = self.config.effective_k(k as usize);
        tracing::debug!(k, "search requested");
        let hits = self.engine.search(query, k).await.map_err(to_fdo)?;
        Ok(hits
            .into_iter()
            .map(|m| (m.id.0, f64::from(m.similarity)))
            .collect())
    }

    /// Target ids, query ids and the row-major matrix scoring each target
    /// against each query. Empty id lists select the whole gallery.
    async fn compare_all(
        &self,
        target_ids: Vec<u64>,
        query_ids: Vec<u64>,
    ) -> zbus::fdo::Result<(Vec<u64>, Vec<u64>, Vec<f64>)> {
        let targets = target_ids.into_iter().map(TemplateId).collect();
        let queries = query_ids.into_iter().map(TemplateId).collect();
        let batch = self
            .engine
            .compare_all(targets, queries)
            .await
            .map_err(to_fdo)?;
        tracing::debug!(
            rows = batch.matrix.rows(),
            cols = batch.matrix.cols(),
            "compare_all served"
        );
        Ok(batch_reply(batch))
    }

    async fn gallery_size(&self) -> zbus::fdo::Result<u64> {
        let size = self.engine.gallery_size().await.map_err(to_fdo)?;
        Ok(size as u64)
    }

    /// The enrolled gallery as a flat gallery buffer.
    async fn export_gallery(&self) -> zbus::fdo::Result<Vec<u8>> {
        self.engine.export().await.map_err(to_fdo)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let gallery_size = self.engine.gallery_size().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "gallery_size": gallery_size,
            "max_template_bytes": self.config.max_template_bytes,
            "default_k": self.config.default_k,
            "max_k": self.config.max_k,
        })
        .to_string())
    }
}
