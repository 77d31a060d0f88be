//! semblance-core — Face embedding extraction and matching.
//!
//! A dense face-landmark model supplies the similarity embedding; a
//! separate lightweight detector supplies bounding boxes for reporting.
//! Both run via ONNX Runtime for CPU inference.

pub mod detector;
pub mod mesh;
pub mod types;

pub use detector::FaceDetector;
pub use mesh::FaceMesh;
pub use types::{DetectionInfo, FaceLocation, FaceRecord};
