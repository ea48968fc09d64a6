use crate::config::Config;
use janus_core::{
    compare, compare_all, enroll, flatten_gallery, gallery_size, search, BatchComparison,
    Comparator, CosineComparator, FlatError, FlatGallery, FlatTemplateRef, GalleryStore,
    MatchError, MemoryGallery, RankedMatch, Similarity, StoreError, Template, TemplateId,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("matching failed: {0}")]
    Match(#[from] MatchError),
    #[error("gallery error: {0}")]
    Store(#[from] StoreError),
    #[error("malformed flat template: {0}")]
    Flat(#[from] FlatError),
    #[error("template id {0} is not enrolled")]
    UnknownTemplate(TemplateId),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollResult {
    pub fragments: usize,
    pub gallery_size: usize,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        id: TemplateId,
        flat_template: Vec<u8>,
        reply: oneshot::Sender<Result<EnrollResult, EngineError>>,
    },
    Verify {
        a: Vec<u8>,
        b: Vec<u8>,
        reply: oneshot::Sender<Result<Similarity, EngineError>>,
    },
    Search {
        query: Vec<u8>,
        k: usize,
        reply: oneshot::Sender<Result<Vec<RankedMatch>, EngineError>>,
    },
    CompareAll {
        target_ids: Vec<TemplateId>,
        query_ids: Vec<TemplateId>,
        reply: oneshot::Sender<Result<BatchComparison, EngineError>>,
    },
    Export {
        reply: oneshot::Sender<Result<Vec<u8>, EngineError>>,
    },
    Size {
        reply: oneshot::Sender<usize>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Decode a flat template and add it to the gallery under `id`.
    pub async fn enroll(
        &self,
        id: TemplateId,
        flat_template: Vec<u8>,
    ) -> Result<EnrollResult, EngineError> {
        self.request(|reply| EngineRequest::Enroll {
            id,
            flat_template,
            reply,
        })
        .await?
    }

    /// Score two flat templates against each other.
    pub async fn verify(&self, a: Vec<u8>, b: Vec<u8>) -> Result<Similarity, EngineError> {
        self.request(|reply| EngineRequest::Verify { a, b, reply })
            .await?
    }

    /// Rank the gallery against a flat query template.
    pub async fn search(&self, query: Vec<u8>, k: usize) -> Result<Vec<RankedMatch>, EngineError> {
        self.request(|reply| EngineRequest::Search { query, k, reply })
            .await?
    }

    /// Cross-compare enrolled templates. An empty id list selects the whole gallery.
    pub async fn compare_all(
        &self,
        target_ids: Vec<TemplateId>,
        query_ids: Vec<TemplateId>,
    ) -> Result<BatchComparison, EngineError> {
        self.request(|reply| EngineRequest::CompareAll {
            target_ids,
            query_ids,
            reply,
        })
        .await?
    }

    /// The gallery as a flat gallery buffer.
    pub async fn export(&self) -> Result<Vec<u8>, EngineError> {
        self.request(|reply| EngineRequest::Export { reply }).await?
    }

    pub async fn gallery_size(&self) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::Size { reply }).await
    }
}

/// Gallery state and comparator, owned by the engine thread.
struct Engine<C> {
    comparator: C,
    gallery: MemoryGallery,
    /// Flattened gallery, rebuilt after the next enrollment invalidates it.
    flat: Option<FlatGallery>,
    max_template_bytes: usize,
}

impl<C: Comparator> Engine<C> {
    fn new(comparator: C, max_template_bytes: usize) -> Self {
        Self {
            comparator,
            gallery: MemoryGallery::new(),
            flat: None,
            max_template_bytes,
        }
    }

    fn handle(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::Enroll {
                id,
                flat_template,
                reply,
            } => {
                let _ = reply.send(self.enroll(id, &flat_template));
            }
            EngineRequest::Verify { a, b, reply } => {
                let _ = reply.send(self.verify(&a, &b));
            }
            EngineRequest::Search { query, k, reply } => {
                let _ = reply.send(self.search(&query, k));
            }
            EngineRequest::CompareAll {
                target_ids,
                query_ids,
                reply,
            } => {
                let _ = reply.send(self.compare_all(&target_ids, &query_ids));
            }
            EngineRequest::Export { reply } => {
                let _ = reply.send(self.export());
            }
            EngineRequest::Size { reply } => {
                let _ = reply.send(gallery_size(&self.gallery));
            }
        }
    }

    fn enroll(&mut self, id: TemplateId, flat_template: &[u8]) -> Result<EnrollResult, EngineError> {
        let template = FlatTemplateRef::new(flat_template).to_template()?;
        let fragments = template.len();
        enroll(template, id, &mut self.gallery)?;
        self.flat = None;
        Ok(EnrollResult {
            fragments,
            gallery_size: gallery_size(&self.gallery),
        })
    }

    fn verify(&self, a: &[u8], b: &[u8]) -> Result<Similarity, EngineError> {
        Ok(compare(
            &self.comparator,
            FlatTemplateRef::new(a),
            FlatTemplateRef::new(b),
        )?)
    }

    fn search(&mut self, query: &[u8], k: usize) -> Result<Vec<RankedMatch>, EngineError> {
        let Self {
            comparator,
            gallery,
            flat,
            max_template_bytes,
        } = self;
        let flat = cached_flat(flat, gallery, *max_template_bytes)?;
        let hits = search(&*comparator, FlatTemplateRef::new(query), flat.view(), k)?;
        tracing::debug!(k, hits = hits.len(), "search served");
        Ok(hits)
    }

    fn compare_all(
        &self,
        target_ids: &[TemplateId],
        query_ids: &[TemplateId],
    ) -> Result<BatchComparison, EngineError> {
        let targets = self.resolve(target_ids)?;
        let queries = self.resolve(query_ids)?;
        Ok(compare_all(&self.comparator, &targets, &queries)?)
    }

    fn export(&mut self) -> Result<Vec<u8>, EngineError> {
        let flat = cached_flat(&mut self.flat, &self.gallery, self.max_template_bytes)?;
        Ok(flat.as_bytes().to_vec())
    }

    fn resolve(&self, ids: &[TemplateId]) -> Result<Vec<Template>, EngineError> {
        if ids.is_empty() {
            return Ok(self.gallery.templates().to_vec());
        }
        ids.iter()
            .map(|&id| {
                self.gallery
                    .get(id)
                    .cloned()
                    .ok_or(EngineError::UnknownTemplate(id))
            })
            .collect()
    }
}

fn cached_flat<'a>(
    cache: &'a mut Option<FlatGallery>,
    gallery: &MemoryGallery,
    max_template_bytes: usize,
) -> Result<&'a FlatGallery, EngineError> {
    let flat = match cache.take() {
        Some(flat) => flat,
        None => {
            let flattened = flatten_gallery(gallery, max_template_bytes)?;
            if !flattened.is_complete() {
                tracing::warn!(
                    incomplete = ?flattened.incomplete,
                    "some gallery templates exceed the size cap"
                );
            }
            flattened.gallery
        }
    };
    Ok(cache.insert(flat))
}

/// Spawn the engine on a dedicated OS thread.
///
/// Matching is CPU-bound and synchronous; D-Bus handlers talk to it over a
/// bounded request queue so the async runtime never blocks on scoring.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let mut engine = Engine::new(CosineComparator, config.max_template_bytes);
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(config.queue_depth);

    std::thread::Builder::new()
        .name("janus-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(request) = rx.blocking_recv() {
                engine.handle(request);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use janus_core::{flatten_template, Embedding, FlatGalleryRef, MAX_TEMPLATE_SIZE};

    fn flat(values: &[f32]) -> Vec<u8> {
        let template = Template::from_fragments(vec![
            Embedding { values: values.to_vec(), model_version: None }.to_fragment(),
        ]);
        flatten_template(&template).unwrap().template.into_bytes()
    }

    fn engine() -> Engine<CosineComparator> {
        Engine::new(CosineComparator, MAX_TEMPLATE_SIZE)
    }

    #[test]
    fn test_enroll_then_search() {
        let mut e = engine();
        e.enroll(TemplateId(1), &flat(&[1.0, 0.0])).unwrap();
        e.enroll(TemplateId(2), &flat(&[0.0, 1.0])).unwrap();
        let result = e.enroll(TemplateId(3), &flat(&[0.7, 0.7])).unwrap();
        assert_eq!(result, EnrollResult { fragments: 1, gallery_size: 3 });

        let hits = e.search(&flat(&[1.0, 0.0]), 2).unwrap();
        assert_eq!(hits[0].id, TemplateId(1));
        assert_eq!(hits[1].id, TemplateId(3));
    }

    #[test]
    fn test_enroll_invalidates_cached_gallery() {
        let mut e = engine();
        e.enroll(TemplateId(1), &flat(&[1.0, 0.0])).unwrap();
        assert_eq!(e.search(&flat(&[1.0, 0.0]), 5).unwrap().len(), 1);
        e.enroll(TemplateId(2), &flat(&[1.0, 0.0])).unwrap();
        assert_eq!(e.search(&flat(&[1.0, 0.0]), 5).unwrap().len(), 2);
    }

    #[test]
    fn test_enroll_rejects_corrupt_and_duplicate() {
        let mut e = engine();
        let mut corrupt = flat(&[1.0]);
        corrupt.pop();
        assert!(matches!(
            e.enroll(TemplateId(1), &corrupt),
            Err(EngineError::Flat(FlatError::Truncated { .. }))
        ));
        e.enroll(TemplateId(1), &flat(&[1.0])).unwrap();
        assert!(matches!(
            e.enroll(TemplateId(1), &flat(&[1.0])),
            Err(EngineError::Store(StoreError::DuplicateId(TemplateId(1))))
        ));
    }

    #[test]
    fn test_compare_all_by_id() {
        let mut e = engine();
        e.enroll(TemplateId(1), &flat(&[1.0, 0.0])).unwrap();
        e.enroll(TemplateId(2), &flat(&[0.0, 1.0])).unwrap();
        let batch = e.compare_all(&[TemplateId(2)], &[]).unwrap();
        assert_eq!(batch.target_ids, vec![TemplateId(2)]);
        assert_eq!(batch.query_ids, vec![TemplateId(1), TemplateId(2)]);
        assert!((batch.matrix.get(0, 1).unwrap() - 1.0).abs() < 1e-6);

        assert!(matches!(
            e.compare_all(&[TemplateId(9)], &[]),
            Err(EngineError::UnknownTemplate(TemplateId(9)))
        ));
    }

    #[test]
    fn test_compare_all_empty_ids_select_whole_gallery() {
        let mut e = engine();
        for (id, values) in [(5, [1.0, 0.0]), (3, [0.0, 1.0]), (8, [1.0, 1.0])] {
            e.enroll(TemplateId(id), &flat(&values)).unwrap();
        }
        let batch = e.compare_all(&[], &[]).unwrap();
        let enrolled = vec![TemplateId(5), TemplateId(3), TemplateId(8)];
        assert_eq!(batch.target_ids, enrolled);
        assert_eq!(batch.query_ids, enrolled);
        assert_eq!((batch.matrix.rows(), batch.matrix.cols()), (3, 3));
        assert!(batch.matrix.get(0, 1).unwrap().abs() < 1e-6);
        assert!((batch.matrix.get(2, 2).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_export_decodes() {
        let mut e = engine();
        e.enroll(TemplateId(4), &flat(&[0.5, 0.5])).unwrap();
        let bytes = e.export().unwrap();
        let entries: Vec<_> = FlatGalleryRef::new(&bytes)
            .entries()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, TemplateId(4));
        assert_eq!(entries[0].template.as_bytes(), flat(&[0.5, 0.5]).as_slice());
    }

    #[tokio::test]
    async fn test_handle_roundtrip() {
        let handle = spawn_engine(&Config::default()).unwrap();
        handle.enroll(TemplateId(8), flat(&[1.0, 2.0])).await.unwrap();
        assert_eq!(handle.gallery_size().await.unwrap(), 1);
        let score = handle.verify(flat(&[1.0, 2.0]), flat(&[2.0, 4.0])).await.unwrap();
        assert!((score - 1.0).abs() < 1e-6);
        let hits = handle.search(flat(&[1.0, 2.0]), 3).await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}
