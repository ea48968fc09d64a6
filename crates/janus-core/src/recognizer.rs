//! ArcFace embedder via ONNX Runtime.
//!
//! Aligns the face on the supplied eye landmarks to the 112×112 ArcFace crop,
//! runs the w600k_r50 model and emits one L2-normalised 512-d fragment.

use crate::algorithm::{EnrollError, Embedder};
use crate::alignment::{align_eyes, ARCFACE_112};
use crate::types::{Attributes, Embedding, EyeLandmarks, Image, Template, EYE_ATTRIBUTES};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric normalisation, not 128
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

/// ArcFace-backed [`Embedder`].
pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EnrollError> {
        if !Path::new(model_path).exists() {
            return Err(EnrollError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    fn embed(&mut self, aligned: &[u8]) -> Result<Embedding, EnrollError> {
        let input = preprocess(aligned);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EnrollError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(EnrollError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw.to_vec()
        };

        Ok(Embedding {
            values,
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

impl Embedder for ArcFaceEmbedder {
    fn project(&mut self, image: &Image, attributes: &Attributes) -> Result<Template, EnrollError> {
        let eyes: EyeLandmarks = attributes.eyes().ok_or_else(|| EnrollError::MissingAttributes {
            missing: attributes.missing(&EYE_ATTRIBUTES),
        })?;

        let gray = image.to_grayscale();
        let aligned = align_eyes(&gray, image.width, image.height, &eyes, &ARCFACE_112)
            .ok_or(EnrollError::DegenerateLandmarks)?;

        let embedding = self.embed(&aligned)?;
        tracing::debug!(dim = embedding.values.len(), "face embedded");
        Ok(Template::from_fragments(vec![embedding.to_fragment()]))
    }
}

/// Grayscale ArcFace crop → 1×3×112×112 tensor with Y replicated across channels.
fn preprocess(aligned: &[u8]) -> Array4<f32> {
    let size = ARCFACE_112.size;
    Array4::from_shape_fn((1, 3, size, size), |(_, _, y, x)| {
        let pixel = aligned.get(y * size + x).copied().unwrap_or(0) as f32;
        (pixel - ARCFACE_MEAN) / ARCFACE_STD
    })
}
