//! Dense face-landmark extractor via ONNX Runtime.
//!
//! Runs a FaceMesh-style model over the whole image and flattens the
//! predicted landmarks into the similarity embedding: 468 landmarks ×
//! (x, y, z) = 1404 floats, in landmark-index order.

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const MESH_INPUT_SIZE: usize = 192;
const MESH_MIN_PRESENCE: f32 = 0.5;

/// Landmark count of the mesh model.
pub const MESH_LANDMARK_COUNT: usize = 468;
/// Embedding length: one (x, y, z) triple per landmark.
pub const EMBEDDING_LEN: usize = MESH_LANDMARK_COUNT * 3;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("model file not found: {0} — place the face mesh ONNX export in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Dense-landmark embedding extractor.
///
/// The session requires `&mut` for inference, so callers confine one
/// instance to a single thread and inject it where needed.
pub struct FaceMesh {
    session: Session,
}

impl FaceMesh {
    /// Load the face mesh ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, MeshError> {
        if !Path::new(model_path).exists() {
            return Err(MeshError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded face mesh model"
        );

        if output_names.len() < 2 {
            return Err(MeshError::InferenceFailed(format!(
                "mesh model must produce landmarks and a presence score, got {} outputs",
                output_names.len()
            )));
        }

        Ok(Self { session })
    }

    /// Extract the landmark embedding for the single most salient face.
    ///
    /// Returns `Ok(None)` when the model's face-presence score is below
    /// 0.5 — "no face" is an expected outcome, not a fault.
    pub fn extract(&mut self, image: &RgbImage) -> Result<Option<Vec<f32>>, MeshError> {
        let input = Self::preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, first) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| MeshError::InferenceFailed(format!("landmarks: {e}")))?;
        let (_, second) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| MeshError::InferenceFailed(format!("presence: {e}")))?;

        // Output order varies between exports; the landmark tensor is the
        // large one, the presence logit is a scalar.
        let (landmarks, presence_logit) = if first.len() >= second.len() {
            (first, second)
        } else {
            (second, first)
        };

        let presence = sigmoid(presence_logit.first().copied().unwrap_or(f32::NEG_INFINITY));
        if presence < MESH_MIN_PRESENCE {
            tracing::debug!(presence, "no face above presence threshold");
            return Ok(None);
        }

        if landmarks.len() != EMBEDDING_LEN {
            return Err(MeshError::InferenceFailed(format!(
                "expected {EMBEDDING_LEN} landmark values, got {}",
                landmarks.len()
            )));
        }

        Ok(Some(normalize_landmarks(landmarks)))
    }

    /// Number of landmarks in a given embedding.
    pub fn landmark_count(embedding: &[f32]) -> usize {
        embedding.len() / 3
    }

    /// Resize to the model input and scale pixels into [0, 1], NCHW.
    fn preprocess(image: &RgbImage) -> Array4<f32> {
        let size = MESH_INPUT_SIZE;
        let resized = image::imageops::resize(image, size as u32, size as u32, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / 255.0;
            }
        }

        tensor
    }
}

/// Scale raw landmark coordinates (model-input pixel units) into relative
/// [0, 1] coordinates, matching the upstream pipeline's normalized output.
fn normalize_landmarks(raw: &[f32]) -> Vec<f32> {
    raw.iter().map(|v| v / MESH_INPUT_SIZE as f32).collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
