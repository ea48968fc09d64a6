//! One-to-many search over a flat gallery.

use crate::algorithm::Comparator;
use crate::gallery::FlatGalleryRef;
use crate::scorer::{compare, MatchError};
use crate::template::{flatten_template, FlatTemplateRef};
use crate::types::{RankedMatch, Similarity, Template, TemplateId};

/// At most `k` matches, best first.
///
/// Equal scores keep offer order: an earlier match stays ahead of a later one
/// and is never evicted by it.
#[derive(Debug, Clone)]
pub struct TopK {
    k: usize,
    held: Vec<RankedMatch>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            held: Vec::with_capacity(k.min(1024)),
        }
    }

    /// Offer a candidate; returns whether it was kept.
    pub fn offer(&mut self, candidate: RankedMatch) -> bool {
        if self.k == 0 {
            return false;
        }
        if self.held.len() == self.k {
            match self.held.last() {
                Some(worst) if candidate.similarity > worst.similarity => {
                    self.held.pop();
                }
                _ => return false,
            }
        }
        let at = self
            .held
            .partition_point(|held| held.similarity >= candidate.similarity);
        self.held.insert(at, candidate);
        true
    }

    /// Lowest-ranked match currently held.
    pub fn worst(&self) -> Option<&RankedMatch> {
        self.held.last()
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn as_slice(&self) -> &[RankedMatch] {
        &self.held
    }

    pub fn into_vec(self) -> Vec<RankedMatch> {
        self.held
    }
}

/// The `k` gallery entries most similar to `query`, best first.
///
/// Returns `min(k, entries)` matches. The query is validated up front, even
/// for an empty gallery or `k = 0`. Any framing or numeric error aborts the
/// whole search.
pub fn search<C: Comparator + ?Sized>(
    comparator: &C,
    query: FlatTemplateRef<'_>,
    gallery: FlatGalleryRef<'_>,
    k: usize,
) -> Result<Vec<RankedMatch>, MatchError> {
    query.validate()?;
    if k == 0 {
        return Ok(Vec::new());
    }

    let mut top = TopK::new(k);
    let mut scored = 0usize;
    for entry in gallery.entries() {
        let entry = entry?;
        let similarity = compare(comparator, query, entry.template)?;
        top.offer(RankedMatch {
            id: entry.id,
            similarity,
        });
        scored += 1;
    }

    tracing::debug!(scored, returned = top.len(), k, "search complete");
    Ok(top.into_vec())
}

/// Flatten a structured query, then [`search`].
pub fn search_template<C: Comparator + ?Sized>(
    comparator: &C,
    query: &Template,
    gallery: FlatGalleryRef<'_>,
    k: usize,
) -> Result<Vec<RankedMatch>, MatchError> {
    let flattened = flatten_template(query)?;
    if !flattened.is_complete() {
        tracing::warn!(
            dropped = flattened.dropped,
            "query template truncated at size cap"
        );
    }
    search(comparator, flattened.template.view(), gallery, k)
}

/// [`search`] into caller-provided arrays, one match per slot.
///
/// Returns the number of slots written. Nothing is written if the search
/// fails or either array is too short for the result.
pub fn search_into<C: Comparator + ?Sized>(
    comparator: &C,
    query: FlatTemplateRef<'_>,
    gallery: FlatGalleryRef<'_>,
    k: usize,
    ids: &mut [TemplateId],
    similarities: &mut [Similarity],
) -> Result<usize, MatchError> {
    let matches = search(comparator, query, gallery, k)?;
    let provided = ids.len().min(similarities.len());
    if matches.len() > provided {
        return Err(MatchError::OutputTooSmall {
            needed: matches.len(),
            provided,
        });
    }
    for (slot, m) in matches.iter().enumerate() {
        ids[slot] = m.id;
        similarities[slot] = m.similarity;
    }
    Ok(matches.len())
}
