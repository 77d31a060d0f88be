use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Listen address for the HTTP server (default: 0.0.0.0:8000).
    pub listen_addr: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Directory holding one serialized record per registered face.
    pub faces_dir: PathBuf,
    /// Similarity above which a registration is rejected as a duplicate.
    pub duplicate_threshold: f32,
    /// Similarity above which a probe is classified as recognized.
    pub recognition_threshold: f32,
}

impl Config {
    /// Load configuration from `SEMBLANCE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            listen_addr: std::env::var("SEMBLANCE_LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            model_dir: std::env::var("SEMBLANCE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models")),
            faces_dir: std::env::var("SEMBLANCE_FACES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("registered_faces")),
            duplicate_threshold: env_f32(
                "SEMBLANCE_DUPLICATE_THRESHOLD",
                semblance_core::types::DUPLICATE_THRESHOLD,
            ),
            recognition_threshold: env_f32(
                "SEMBLANCE_RECOGNITION_THRESHOLD",
                semblance_core::types::RECOGNITION_THRESHOLD,
            ),
        }
    }

    /// Path to the dense-landmark mesh model.
    pub fn mesh_model_path(&self) -> String {
        self.model_dir
            .join("face_mesh_468.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the UltraFace detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("ultraface_rfb_320.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
