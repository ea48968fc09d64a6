//! janus-core: biometric template interchange and matching.
//!
//! Templates are flattened into a self-describing, length-prefixed byte
//! format and collected into flat galleries. Matching runs over those buffers:
//! one-to-one verification, top-K search and many-to-many batch comparison.
//! Feature extraction and the fragment metric are pluggable through
//! [`Embedder`] and [`Comparator`].

pub mod algorithm;
pub mod alignment;
pub mod batch;
pub mod frame;
pub mod gallery;
#[cfg(feature = "onnx")]
pub mod recognizer;
pub mod scorer;
pub mod search;
pub mod store;
pub mod template;
pub mod types;

pub use algorithm::{augment, Algorithm, Comparator, CosineComparator, Embedder, EnrollError};
pub use batch::{compare_all, BatchComparison, SimilarityMatrix};
pub use frame::{decode_frame, encode_frame, FlatError, FrameCursor};
pub use gallery::{
    decode_gallery, encode_gallery, FlatGallery, FlatGalleryBuilder, FlatGalleryRef,
    FlattenedGallery, GalleryEntry,
};
#[cfg(feature = "onnx")]
pub use recognizer::ArcFaceEmbedder;
pub use scorer::{compare, compare_templates, is_degenerate, MatchError};
pub use search::{search, search_into, search_template, TopK};
pub use store::{enroll, flatten_gallery, gallery_size, GalleryStore, MemoryGallery, StoreError};
pub use template::{
    decode_template, encode_template, flatten_template, max_template_size, FlatTemplate,
    FlatTemplateRef, Flattened, MAX_TEMPLATE_SIZE,
};
pub use types::{
    Attributes, ColorSpace, Embedding, EyeLandmarks, Fragment, Image, RankedMatch, Similarity,
    StridedBytes, Template, TemplateId, NO_COMPARISON,
};
