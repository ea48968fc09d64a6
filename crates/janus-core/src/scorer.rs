//! One-to-one verification between flat templates.
//!
//! The score is the mean of the comparator over the full cross product of
//! fragments. No pairs yields [`NO_COMPARISON`]; a NaN total is an error.

use crate::algorithm::Comparator;
use crate::frame::FlatError;
use crate::template::FlatTemplateRef;
use crate::types::{Similarity, Template, NO_COMPARISON};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("malformed template data: {0}")]
    Flat(#[from] FlatError),
    #[error("similarity is not finite: {similarity}")]
    NonFinite { similarity: f32 },
    #[error("template {index} has no template id")]
    MissingTemplateId { index: usize },
    #[error("comparator returned a {actual_rows}x{actual_cols} matrix, expected {rows}x{cols}")]
    MatrixShape {
        rows: usize,
        cols: usize,
        actual_rows: usize,
        actual_cols: usize,
    },
    #[error("output holds {provided} slots, {needed} needed")]
    OutputTooSmall { needed: usize, provided: usize },
}

/// Similarity of two flat templates.
///
/// Both buffers are fully decoded; a framing error on either side is returned
/// even when the other side is empty.
pub fn compare<C: Comparator + ?Sized>(
    comparator: &C,
    a: FlatTemplateRef<'_>,
    b: FlatTemplateRef<'_>,
) -> Result<Similarity, MatchError> {
    let rhs = b.fragments().collect::<Result<Vec<_>, _>>()?;

    let mut sum = 0.0f32;
    let mut comparisons = 0usize;
    for lhs in a.fragments() {
        let lhs = lhs?;
        for rhs in &rhs {
            sum += comparator.score(lhs, rhs);
            comparisons += 1;
        }
    }

    if !sum.is_finite() {
        return Err(MatchError::NonFinite { similarity: sum });
    }
    if comparisons == 0 {
        return Ok(NO_COMPARISON);
    }
    Ok(sum / comparisons as f32)
}

/// Similarity of two structured templates via [`Comparator::score_templates`].
pub fn compare_templates<C: Comparator + ?Sized>(
    comparator: &C,
    a: &Template,
    b: &Template,
) -> Result<Similarity, MatchError> {
    let similarity = comparator.score_templates(a, b);
    if !similarity.is_finite() {
        return Err(MatchError::NonFinite { similarity });
    }
    Ok(similarity)
}

/// True for the score reported when nothing could be compared.
pub fn is_degenerate(similarity: Similarity) -> bool {
    similarity == NO_COMPARISON
}
