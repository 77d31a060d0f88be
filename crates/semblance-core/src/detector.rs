//! UltraFace face detector via ONNX Runtime.
//!
//! Produces the coarse bounding box reported alongside recognition
//! results. The detector is deliberately separate from the landmark
//! model and plays no role in matching.

use crate::types::FaceLocation;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DETECTOR_INPUT_WIDTH: usize = 320;
const DETECTOR_INPUT_HEIGHT: usize = 240;
const DETECTOR_MEAN: f32 = 127.0;
const DETECTOR_STD: f32 = 128.0;
const DETECTOR_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — place the UltraFace ONNX export in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// UltraFace-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Output tensor positions (scores, boxes), discovered by name at
    /// load time with a positional fallback.
    output_indices: (usize, usize),
}

impl FaceDetector {
    /// Load the UltraFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
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
            "loaded face detector model"
        );

        if output_names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "detector model requires scores and boxes outputs, got {}",
                output_names.len()
            )));
        }

        let output_indices = discover_output_indices(&output_names);

        Ok(Self {
            session,
            output_indices,
        })
    }

    /// Detect the single most confident face, returning its bounding box
    /// in absolute pixel coordinates of the original image.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Option<FaceLocation>, DetectorError> {
        let input = Self::preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (scores_idx, boxes_idx) = self.output_indices;
        let (_, scores) = outputs[scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        Ok(best_detection(scores, boxes, DETECTOR_CONFIDENCE_THRESHOLD)
            .map(|(_, rel)| to_absolute(rel, image.width(), image.height())))
    }

    /// Resize to the fixed detector input and normalize to the UltraFace
    /// input distribution, NCHW.
    fn preprocess(image: &RgbImage) -> Array4<f32> {
        let resized = image::imageops::resize(
            image,
            DETECTOR_INPUT_WIDTH as u32,
            DETECTOR_INPUT_HEIGHT as u32,
            FilterType::Triangle,
        );

        let mut tensor =
            Array4::<f32>::zeros((1, 3, DETECTOR_INPUT_HEIGHT, DETECTOR_INPUT_WIDTH));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel.0[c] as f32 - DETECTOR_MEAN) / DETECTOR_STD;
            }
        }

        tensor
    }
}

/// Discover output tensor ordering by name.
///
/// UltraFace exports name the tensors "scores" and "boxes"; generic
/// exports fall back to positional ordering [0]=scores, [1]=boxes.
fn discover_output_indices(names: &[String]) -> (usize, usize) {
    let scores = names.iter().position(|n| n == "scores");
    let boxes = names.iter().position(|n| n == "boxes");

    match (scores, boxes) {
        (Some(s), Some(b)) => (s, b),
        _ => {
            tracing::info!(
                ?names,
                "detector output names not recognized, using positional mapping [0]=scores, [1]=boxes"
            );
            (0, 1)
        }
    }
}

/// Pick the highest-confidence candidate above the threshold.
///
/// `scores` is `[background, face]` pairs per anchor; `boxes` is relative
/// corner coordinates `[x1, y1, x2, y2]` per anchor.
fn best_detection(scores: &[f32], boxes: &[f32], threshold: f32) -> Option<(f32, [f32; 4])> {
    let num_anchors = scores.len() / 2;
    let mut best: Option<(f32, [f32; 4])> = None;

    for idx in 0..num_anchors {
        let confidence = scores[idx * 2 + 1];
        if confidence <= threshold {
            continue;
        }

        let box_off = idx * 4;
        if box_off + 3 >= boxes.len() {
            continue;
        }

        if best.map_or(true, |(c, _)| confidence > c) {
            best = Some((
                confidence,
                [
                    boxes[box_off],
                    boxes[box_off + 1],
                    boxes[box_off + 2],
                    boxes[box_off + 3],
                ],
            ));
        }
    }

    best
}

/// Convert a relative corner box into absolute pixel coordinates.
fn to_absolute(rel: [f32; 4], width: u32, height: u32) -> FaceLocation {
    let [x1, y1, x2, y2] = rel;
    let w = width as f32;
    let h = height as f32;

    FaceLocation {
        left: (x1 * w) as i64,
        top: (y1 * h) as i64,
        width: ((x2 - x1) * w) as i64,
        height: ((y2 - y1) * h) as i64,
    }
}
