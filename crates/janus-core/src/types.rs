use crate::frame::FlatError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Caller-assigned template identifier, unique within a gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub u64);

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TemplateId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Similarity between two templates. Higher = more similar.
pub type Similarity = f32;

/// Score reported when no fragment pairs could be compared.
///
/// Lower than any score a comparison can produce, so it always ranks last.
pub const NO_COMPARISON: Similarity = -f32::MAX;

/// Backing storage for one feature embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// A single contiguous block of bytes.
    Contiguous(Vec<u8>),
    /// Rows laid out at a fixed stride. Built with [`Fragment::strided`].
    Strided(StridedBytes),
}

/// `rows` rows of `row_bytes` bytes each, row starts `stride` bytes apart.
///
/// Every row lies inside `data`; the fields are private so that holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StridedBytes {
    data: Vec<u8>,
    rows: usize,
    row_bytes: usize,
    stride: usize,
}

impl StridedBytes {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    fn len(&self) -> usize {
        self.rows * self.row_bytes
    }

    fn as_contiguous(&self) -> Option<&[u8]> {
        if self.rows <= 1 || self.stride == self.row_bytes {
            Some(&self.data[..self.len()])
        } else {
            None
        }
    }

    fn gather(&self) -> Vec<u8> {
        let mut gathered = Vec::with_capacity(self.len());
        for start in (0..self.rows).map(|row| row * self.stride) {
            gathered.extend_from_slice(&self.data[start..start + self.row_bytes]);
        }
        gathered
    }
}

impl Fragment {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Contiguous(bytes.into())
    }

    /// Build a strided view, checking that every row lies inside `data`.
    pub fn strided(
        data: Vec<u8>,
        rows: usize,
        row_bytes: usize,
        stride: usize,
    ) -> Result<Self, FlatError> {
        if rows > 0 && row_bytes > 0 {
            if stride < row_bytes {
                return Err(FlatError::InvalidStride(format!(
                    "stride {stride} is shorter than row width {row_bytes}"
                )));
            }
            let span = (rows - 1)
                .checked_mul(stride)
                .and_then(|s| s.checked_add(row_bytes));
            match span {
                Some(span) if span <= data.len() => {}
                _ => {
                    return Err(FlatError::InvalidStride(format!(
                        "{rows} rows of {row_bytes} bytes at stride {stride} exceed {} bytes",
                        data.len()
                    )))
                }
            }
        }
        // Empty views hold zero rows, so no row offset is ever sliced.
        let (rows, row_bytes) = if rows == 0 || row_bytes == 0 {
            (0, 0)
        } else {
            (rows, row_bytes)
        };
        Ok(Self::Strided(StridedBytes {
            data,
            rows,
            row_bytes,
            stride,
        }))
    }

    /// Logical byte count (excludes stride padding).
    pub fn len(&self) -> usize {
        match self {
            Self::Contiguous(bytes) => bytes.len(),
            Self::Strided(strided) => strided.len(),
        }
    }

    /// True when there is no backing data, i.e. feature extraction produced nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The fragment bytes as one slice, or `None` if rows are padded apart.
    pub fn as_contiguous(&self) -> Option<&[u8]> {
        match self {
            Self::Contiguous(bytes) => Some(bytes),
            Self::Strided(strided) => strided.as_contiguous(),
        }
    }

    /// The fragment bytes, gathering padded rows into a fresh buffer if needed.
    pub fn bytes(&self) -> Cow<'_, [u8]> {
        match self {
            Self::Contiguous(bytes) => Cow::Borrowed(bytes),
            Self::Strided(strided) => match strided.as_contiguous() {
                Some(bytes) => Cow::Borrowed(bytes),
                None => Cow::Owned(strided.gather()),
            },
        }
    }
}

/// An ordered collection of fragments for one enrolled subject instance.
///
/// Fragment order is insertion order and carries no ranking meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    id: Option<TemplateId>,
    fragments: Vec<Fragment>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fragments(fragments: Vec<Fragment>) -> Self {
        Self {
            id: None,
            fragments,
        }
    }

    pub fn with_id(mut self, id: TemplateId) -> Self {
        self.id = Some(id);
        self
    }

    /// Identifier stamped at enrollment, if any.
    pub fn id(&self) -> Option<TemplateId> {
        self.id
    }

    pub fn set_id(&mut self, id: TemplateId) {
        self.id = Some(id);
    }

    pub fn push(&mut self, fragment: Fragment) {
        self.fragments.push(fragment);
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn into_fragments(self) -> Vec<Fragment> {
        self.fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

impl Extend<Fragment> for Template {
    fn extend<I: IntoIterator<Item = Fragment>>(&mut self, iter: I) {
        self.fragments.extend(iter);
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Decode native-endian f32 fragment bytes. `None` if the length is not a multiple of 4.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self {
            values,
            model_version: None,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.values.len() * 4);
        for v in &self.values {
            buf.extend_from_slice(&v.to_ne_bytes());
        }
        buf
    }

    pub fn to_fragment(&self) -> Fragment {
        Fragment::Contiguous(self.to_bytes())
    }

    /// Cosine similarity in [-1, 1]. Zero when either vector has zero norm.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// Pixel layout of an [`Image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpace {
    Gray8,
    Bgr24,
}

impl ColorSpace {
    pub fn channels(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Bgr24 => 3,
        }
    }
}

/// Raw, already-decoded image handed to an embedder.
#[derive(Debug, Clone)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub color_space: ColorSpace,
}

impl Image {
    pub fn gray(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            color_space: ColorSpace::Gray8,
        }
    }

    /// Grayscale pixels, converting BGR with BT.601 luma weights.
    ///
    /// Missing trailing pixels (short buffer) read as black.
    pub fn to_grayscale(&self) -> Vec<u8> {
        let pixels = self.width as usize * self.height as usize;
        match self.color_space {
            ColorSpace::Gray8 => {
                let mut gray = self.data.iter().take(pixels).copied().collect::<Vec<_>>();
                gray.resize(pixels, 0);
                gray
            }
            ColorSpace::Bgr24 => (0..pixels)
                .map(|i| match self.data.get(i * 3..i * 3 + 3) {
                    Some(&[b, g, r]) => {
                        (0.114 * b as f32 + 0.587 * g as f32 + 0.299 * r as f32)
                            .round()
                            .clamp(0.0, 255.0) as u8
                    }
                    _ => 0,
                })
                .collect(),
        }
    }
}

pub const RIGHT_EYE_X: &str = "RIGHT_EYE_X";
pub const RIGHT_EYE_Y: &str = "RIGHT_EYE_Y";
pub const LEFT_EYE_X: &str = "LEFT_EYE_X";
pub const LEFT_EYE_Y: &str = "LEFT_EYE_Y";

/// Landmark attributes every enrollment must carry.
pub const EYE_ATTRIBUTES: [&str; 4] = [RIGHT_EYE_X, RIGHT_EYE_Y, LEFT_EYE_X, LEFT_EYE_Y];

/// Named numeric attributes accompanying an enrollment image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, f32>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f32) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: f32) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.0.get(name).copied()
    }

    /// Which of `required` are absent, in the order given.
    pub fn missing(&self, required: &[&'static str]) -> Vec<&'static str> {
        required
            .iter()
            .copied()
            .filter(|name| !self.0.contains_key(*name))
            .collect()
    }

    pub fn eyes(&self) -> Option<EyeLandmarks> {
        Some(EyeLandmarks {
            right: (self.get(RIGHT_EYE_X)?, self.get(RIGHT_EYE_Y)?),
            left: (self.get(LEFT_EYE_X)?, self.get(LEFT_EYE_Y)?),
        })
    }
}

/// Eye centres in image coordinates. "Right" is the subject's right eye.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeLandmarks {
    pub right: (f32, f32),
    pub left: (f32, f32),
}

/// One search hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankedMatch {
    pub id: TemplateId,
    pub similarity: Similarity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding { values: vec![1.0, 0.0, 0.0], model_version: None };
        let b = Embedding { values: vec![1.0, 0.0, 0.0], model_version: None };
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = Embedding { values: vec![1.0, 0.0], model_version: None };
        let b = Embedding { values: vec![-1.0, 0.0], model_version: None };
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding { values: vec![0.0, 0.0], model_version: None };
        let b = Embedding { values: vec![1.0, 0.0], model_version: None };
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_embedding_bytes_roundtrip() {
        let e = Embedding { values: vec![0.25, -3.5, 1e-7], model_version: None };
        let bytes = e.to_bytes();
        assert_eq!(bytes.len(), 12);
        let back = Embedding::from_bytes(&bytes).unwrap();
        assert_eq!(back.values, e.values);
    }

    #[test]
    fn test_embedding_from_ragged_bytes() {
        assert!(Embedding::from_bytes(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_strided_fragment_contiguity() {
        let packed = Fragment::strided(vec![1, 2, 3, 4, 5, 6], 2, 3, 3).unwrap();
        assert_eq!(packed.as_contiguous(), Some(&[1u8, 2, 3, 4, 5, 6][..]));

        let padded = Fragment::strided(vec![1, 2, 0, 3, 4, 0], 2, 2, 3).unwrap();
        assert_eq!(padded.len(), 4);
        assert!(padded.as_contiguous().is_none());
        assert_eq!(padded.bytes().as_ref(), &[1, 2, 3, 4]);

        let single_row = Fragment::strided(vec![9, 9, 0, 0], 1, 2, 4).unwrap();
        assert_eq!(single_row.as_contiguous(), Some(&[9u8, 9][..]));
    }

    #[test]
    fn test_strided_fragment_out_of_bounds() {
        assert!(Fragment::strided(vec![0; 5], 2, 3, 3).is_err());
        assert!(Fragment::strided(vec![0; 8], 2, 4, 2).is_err());
        assert!(Fragment::strided(Vec::new(), 0, 4, 4).unwrap().is_empty());
    }

    #[test]
    fn test_strided_fragment_never_reads_past_data() {
        assert!(matches!(
            Fragment::strided(vec![1, 2], 1, 8, 8),
            Err(FlatError::InvalidStride(_))
        ));

        // Zero-width rows at a stride far beyond the data are just empty.
        let hollow = Fragment::strided(vec![1, 2], 3, 0, 100).unwrap();
        assert!(hollow.is_empty());
        assert_eq!(hollow.as_contiguous(), Some(&[][..]));
        assert!(hollow.bytes().is_empty());
    }

    #[test]
    fn test_bgr_to_grayscale() {
        let image = Image {
            data: vec![0, 0, 255, 255, 255, 255],
            width: 2,
            height: 1,
            color_space: ColorSpace::Bgr24,
        };
        let gray = image.to_grayscale();
        assert_eq!(gray, vec![76, 255]);
    }

    #[test]
    fn test_gray_short_buffer_padded() {
        let image = Image::gray(vec![7, 8], 2, 2);
        assert_eq!(image.to_grayscale(), vec![7, 8, 0, 0]);
    }

    #[test]
    fn test_attributes_missing_eyes() {
        let attrs = Attributes::new().with(RIGHT_EYE_X, 10.0).with(LEFT_EYE_Y, 20.0);
        assert_eq!(attrs.missing(&EYE_ATTRIBUTES), vec![RIGHT_EYE_Y, LEFT_EYE_X]);
        assert!(attrs.eyes().is_none());
    }

    #[test]
    fn test_attributes_from_json() {
        let attrs: Attributes = serde_json::from_str(
            r#"{"RIGHT_EYE_X": 30.0, "RIGHT_EYE_Y": 40.0, "LEFT_EYE_X": 70.0, "LEFT_EYE_Y": 41.0}"#,
        )
        .unwrap();
        let eyes = attrs.eyes().unwrap();
        assert_eq!(eyes.right, (30.0, 40.0));
        assert_eq!(eyes.left, (70.0, 41.0));
    }
}
