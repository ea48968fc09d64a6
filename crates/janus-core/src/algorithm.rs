//! Pluggable feature extraction and comparison.
//!
//! [`Algorithm`] bundles one [`Embedder`] with one [`Comparator`]. It is built
//! once by the caller and passed to every enrollment and matching call; there
//! is no process-wide default.

use crate::batch::{compare_all, BatchComparison, SimilarityMatrix};
use crate::gallery::FlatGalleryRef;
use crate::scorer::{compare, MatchError};
use crate::search::search;
use crate::template::FlatTemplateRef;
use crate::types::{
    Attributes, Embedding, Fragment, Image, RankedMatch, Similarity, Template, EYE_ATTRIBUTES,
    NO_COMPARISON,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("missing required attributes: {missing:?}")]
    MissingAttributes { missing: Vec<&'static str> },
    #[error("failed to enroll: no features extracted")]
    FailureToEnroll,
    #[error("eye landmarks coincide; cannot align face")]
    DegenerateLandmarks,
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[cfg(feature = "onnx")]
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns an image plus landmark attributes into a template.
pub trait Embedder {
    fn project(&mut self, image: &Image, attributes: &Attributes) -> Result<Template, EnrollError>;
}

/// Scores fragment pairs. Higher = more similar.
pub trait Comparator {
    /// Similarity between two fragment payloads. May be NaN for inputs the
    /// comparator cannot interpret; callers treat NaN as an error.
    fn score(&self, a: &[u8], b: &[u8]) -> f32;

    /// Mean of [`score`](Self::score) over every (a, b) fragment pair, skipping
    /// empty fragments. [`NO_COMPARISON`] when no pair exists.
    fn score_templates(&self, a: &Template, b: &Template) -> f32 {
        let rhs: Vec<_> = b
            .fragments()
            .iter()
            .filter(|f| !f.is_empty())
            .map(Fragment::bytes)
            .collect();

        let mut sum = 0.0f32;
        let mut comparisons = 0usize;
        for lhs in a.fragments().iter().filter(|f| !f.is_empty()) {
            let lhs = lhs.bytes();
            for rhs in &rhs {
                sum += self.score(&lhs, rhs);
                comparisons += 1;
            }
        }

        if sum.is_nan() {
            return sum;
        }
        if comparisons == 0 {
            return NO_COMPARISON;
        }
        sum / comparisons as f32
    }

    /// Row-major `targets × queries` matrix of [`score_templates`](Self::score_templates).
    fn score_batch(&self, targets: &[Template], queries: &[Template]) -> SimilarityMatrix {
        let mut matrix = SimilarityMatrix::new(targets.len(), queries.len());
        for (i, target) in targets.iter().enumerate() {
            for (j, query) in queries.iter().enumerate() {
                matrix.set(i, j, self.score_templates(target, query));
            }
        }
        matrix
    }
}

impl<C: Comparator + ?Sized> Comparator for &C {
    fn score(&self, a: &[u8], b: &[u8]) -> f32 {
        (**self).score(a, b)
    }

    fn score_templates(&self, a: &Template, b: &Template) -> f32 {
        (**self).score_templates(a, b)
    }

    fn score_batch(&self, targets: &[Template], queries: &[Template]) -> SimilarityMatrix {
        (**self).score_batch(targets, queries)
    }
}

impl<C: Comparator + ?Sized> Comparator for Box<C> {
    fn score(&self, a: &[u8], b: &[u8]) -> f32 {
        (**self).score(a, b)
    }

    fn score_templates(&self, a: &Template, b: &Template) -> f32 {
        (**self).score_templates(a, b)
    }

    fn score_batch(&self, targets: &[Template], queries: &[Template]) -> SimilarityMatrix {
        (**self).score_batch(targets, queries)
    }
}

/// Cosine similarity over fragments holding native-endian f32 vectors.
///
/// Fragments of different lengths, or lengths not divisible by 4, score NaN.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineComparator;

impl Comparator for CosineComparator {
    fn score(&self, a: &[u8], b: &[u8]) -> f32 {
        if a.len() != b.len() {
            return f32::NAN;
        }
        match (Embedding::from_bytes(a), Embedding::from_bytes(b)) {
            (Some(a), Some(b)) => a.similarity(&b),
            _ => f32::NAN,
        }
    }
}

/// Project `image` and append the resulting fragments to `template`.
///
/// All four eye attributes must be present. Returns the number of fragments
/// appended. When the projection yields nothing usable the fragments (if any)
/// are still appended and [`EnrollError::FailureToEnroll`] is returned.
pub fn augment<E: Embedder + ?Sized>(
    embedder: &mut E,
    image: &Image,
    attributes: &Attributes,
    template: &mut Template,
) -> Result<usize, EnrollError> {
    let missing = attributes.missing(&EYE_ATTRIBUTES);
    if !missing.is_empty() {
        return Err(EnrollError::MissingAttributes { missing });
    }

    let projected = embedder.project(image, attributes)?;
    let failed = projected.fragments().first().map_or(true, Fragment::is_empty);
    let added = projected.len();
    template.extend(projected.into_fragments());

    tracing::debug!(added, total = template.len(), failed, "template augmented");
    if failed {
        return Err(EnrollError::FailureToEnroll);
    }
    Ok(added)
}

/// An embedder and comparator pair, passed explicitly to every call.
pub struct Algorithm<E, C> {
    embedder: E,
    comparator: C,
}

impl<E: Embedder, C: Comparator> Algorithm<E, C> {
    pub fn new(embedder: E, comparator: C) -> Self {
        Self {
            embedder,
            comparator,
        }
    }

    pub fn embedder_mut(&mut self) -> &mut E {
        &mut self.embedder
    }

    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    pub fn augment(
        &mut self,
        image: &Image,
        attributes: &Attributes,
        template: &mut Template,
    ) -> Result<usize, EnrollError> {
        augment(&mut self.embedder, image, attributes, template)
    }

    pub fn verify(
        &self,
        a: FlatTemplateRef<'_>,
        b: FlatTemplateRef<'_>,
    ) -> Result<Similarity, MatchError> {
        compare(&self.comparator, a, b)
    }

    pub fn search(
        &self,
        query: FlatTemplateRef<'_>,
        gallery: FlatGalleryRef<'_>,
        k: usize,
    ) -> Result<Vec<RankedMatch>, MatchError> {
        search(&self.comparator, query, gallery, k)
    }

    pub fn compare_all(
        &self,
        targets: &[Template],
        queries: &[Template],
    ) -> Result<BatchComparison, MatchError> {
        compare_all(&self.comparator, targets, queries)
    }
}
