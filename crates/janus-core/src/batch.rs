//! Many-to-many comparison over structured templates.

use crate::algorithm::Comparator;
use crate::scorer::MatchError;
use crate::types::{Similarity, Template, TemplateId};
use serde::Serialize;

/// Dense row-major similarity matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityMatrix {
    rows: usize,
    cols: usize,
    data: Vec<Similarity>,
}

impl SimilarityMatrix {
    /// `rows × cols` matrix of zeros.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Wrap row-major `data`, which must hold exactly `rows * cols` values.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<Similarity>) -> Option<Self> {
        (rows.checked_mul(cols)? == data.len()).then_some(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<Similarity> {
        if row < self.rows && col < self.cols {
            self.data.get(row * self.cols + col).copied()
        } else {
            None
        }
    }

    /// Store `value`, returning the score it replaced. `None` (and no write)
    /// if `row` or `col` is out of range.
    pub fn set(&mut self, row: usize, col: usize, value: Similarity) -> Option<Similarity> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        let slot = self.data.get_mut(row * self.cols + col)?;
        Some(std::mem::replace(slot, value))
    }

    pub fn row(&self, row: usize) -> Option<&[Similarity]> {
        (row < self.rows).then(|| &self.data[row * self.cols..(row + 1) * self.cols])
    }

    pub fn as_slice(&self) -> &[Similarity] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<Similarity> {
        self.data
    }

    /// Native-endian f32 bytes, `rows * cols * 4` long.
    pub fn to_ne_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() * 4);
        for v in &self.data {
            out.extend_from_slice(&v.to_ne_bytes());
        }
        out
    }
}

/// Output of [`compare_all`]: scores plus the ids labelling rows and columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchComparison {
    pub matrix: SimilarityMatrix,
    pub target_ids: Vec<TemplateId>,
    pub query_ids: Vec<TemplateId>,
}

/// Compare every target against every query.
///
/// `matrix[i][j]` scores `targets[i]` against `queries[j]`. Every template
/// must carry an id.
pub fn compare_all<C: Comparator + ?Sized>(
    comparator: &C,
    targets: &[Template],
    queries: &[Template],
) -> Result<BatchComparison, MatchError> {
    let target_ids = template_ids(targets)?;
    let query_ids = template_ids(queries)?;

    let matrix = comparator.score_batch(targets, queries);
    if matrix.rows() != targets.len() || matrix.cols() != queries.len() {
        return Err(MatchError::MatrixShape {
            rows: targets.len(),
            cols: queries.len(),
            actual_rows: matrix.rows(),
            actual_cols: matrix.cols(),
        });
    }
    if let Some(&similarity) = matrix.as_slice().iter().find(|s| !s.is_finite()) {
        return Err(MatchError::NonFinite { similarity });
    }

    tracing::debug!(
        targets = targets.len(),
        queries = queries.len(),
        "batch comparison complete"
    );
    Ok(BatchComparison {
        matrix,
        target_ids,
        query_ids,
    })
}

fn template_ids(templates: &[Template]) -> Result<Vec<TemplateId>, MatchError> {
    templates
        .iter()
        .enumerate()
        .map(|(index, t)| t.id().ok_or(MatchError::MissingTemplateId { index }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::CosineComparator;
    use crate::scorer::compare_templates;
    use crate::types::{Embedding, Fragment, NO_COMPARISON};

    fn template(id: u64, vectors: &[&[f32]]) -> Template {
        Template::from_fragments(
            vectors
                .iter()
                .map(|v| Embedding { values: v.to_vec(), model_version: None }.to_fragment())
                .collect(),
        )
        .with_id(TemplateId(id))
    }

    #[test]
    fn test_matrix_shape_and_ids() {
        let targets = vec![
            template(1, &[&[1.0, 0.0]]),
            template(2, &[&[0.0, 1.0]]),
            template(3, &[&[1.0, 1.0], &[1.0, 0.0]]),
        ];
        let queries = vec![template(10, &[&[1.0, 0.0]]), template(20, &[&[-1.0, 0.0]])];

        let result = compare_all(&CosineComparator, &targets, &queries).unwrap();
        assert_eq!(result.matrix.rows(), 3);
        assert_eq!(result.matrix.cols(), 2);
        assert_eq!(result.target_ids, vec![TemplateId(1), TemplateId(2), TemplateId(3)]);
        assert_eq!(result.query_ids, vec![TemplateId(10), TemplateId(20)]);
        assert_eq!(result.matrix.to_ne_bytes().len(), 3 * 2 * 4);

        for (i, t) in targets.iter().enumerate() {
            for (j, q) in queries.iter().enumerate() {
                let pairwise = compare_templates(&CosineComparator, t, q).unwrap();
                let cell = result.matrix.get(i, j).unwrap();
                assert!((cell - pairwise).abs() < 1e-6, "cell ({i},{j}) = {cell}, pairwise = {pairwise}");
            }
        }
    }

    #[test]
    fn test_missing_id_rejected() {
        let targets = vec![template(1, &[&[1.0]]), Template::new()];
        let err = compare_all(&CosineComparator, &targets, &[]).unwrap_err();
        assert_eq!(err, MatchError::MissingTemplateId { index: 1 });
    }

    #[test]
    fn test_empty_inputs() {
        let result = compare_all(&CosineComparator, &[], &[template(1, &[&[1.0]])]).unwrap();
        assert_eq!(result.matrix.rows(), 0);
        assert_eq!(result.matrix.cols(), 1);
        assert!(result.matrix.as_slice().is_empty());
        assert_eq!(result.query_ids.len(), 1);
    }

    #[test]
    fn test_empty_template_cell_is_sentinel() {
        let targets = vec![Template::new().with_id(TemplateId(5))];
        let queries = vec![template(6, &[&[1.0]])];
        let result = compare_all(&CosineComparator, &targets, &queries).unwrap();
        assert_eq!(result.matrix.get(0, 0), Some(NO_COMPARISON));
    }

    #[test]
    fn test_nan_cell_rejected() {
        let targets = vec![template(1, &[&[1.0, 0.0]])];
        let queries = vec![Template::from_fragments(vec![Fragment::new(vec![1, 2, 3])])
            .with_id(TemplateId(2))];
        assert!(matches!(
            compare_all(&CosineComparator, &targets, &queries),
            Err(MatchError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_bad_shape_from_comparator() {
        struct Lopsided;
        impl Comparator for Lopsided {
            fn score(&self, _: &[u8], _: &[u8]) -> f32 {
                0.0
            }
            fn score_batch(&self, _: &[Template], _: &[Template]) -> SimilarityMatrix {
                SimilarityMatrix::new(1, 1)
            }
        }
        let targets = vec![template(1, &[&[1.0]]), template(2, &[&[1.0]])];
        assert!(matches!(
            compare_all(&Lopsided, &targets, &targets),
            Err(MatchError::MatrixShape { rows: 2, cols: 2, actual_rows: 1, actual_cols: 1 })
        ));
    }

    #[test]
    fn test_matrix_accessors() {
        let m = SimilarityMatrix::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(m.row(1), Some(&[3.0, 4.0][..]));
        assert_eq!(m.get(0, 1), Some(2.0));
        assert_eq!(m.get(2, 0), None);
        assert!(SimilarityMatrix::from_vec(2, 2, vec![1.0]).is_none());
    }

    #[test]
    fn test_matrix_set_out_of_range() {
        let mut m = SimilarityMatrix::new(2, 3);
        assert_eq!(m.set(1, 2, 0.5), Some(0.0));
        assert_eq!(m.set(1, 2, 0.75), Some(0.5));
        // (0, 3) would alias (1, 0) in row-major order.
        assert_eq!(m.set(0, 3, 9.0), None);
        assert_eq!(m.set(2, 0, 9.0), None);
        assert_eq!(m.as_slice(), &[0.0, 0.0, 0.0, 0.0, 0.0, 0.75]);
    }
}
