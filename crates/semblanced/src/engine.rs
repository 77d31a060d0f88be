//! Inference engine: both ONNX sessions and the face store live on one
//! dedicated OS thread behind a request channel.
//!
//! Confining the sessions to a single thread keeps them out of global
//! state, and serializing requests closes the duplicate-check-then-write
//! race on registration: the scan, the ordinal count, and the file write
//! all happen back to back on this thread.

use crate::store::{DirStore, FaceStore, StoreError};
use image::RgbImage;
use semblance_core::detector::DetectorError;
use semblance_core::mesh::MeshError;
use semblance_core::{types, DetectionInfo, FaceDetector, FaceMesh, FaceRecord};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("name must not contain path separators or '..'")]
    InvalidName,
    #[error("no face found in image")]
    NoFaceFound,
    #[error("face already registered (similarity: {:.1}%)", .similarity * 100.0)]
    DuplicateFace { similarity: f32 },
    #[error("image decode failed: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error(transparent)]
    Mesh(#[from] MeshError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl EngineError {
    /// Expected domain failures the client caused, as opposed to internal
    /// faults.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::EmptyName
                | EngineError::InvalidName
                | EngineError::NoFaceFound
                | EngineError::DuplicateFace { .. }
        )
    }
}

/// Outcome of a recognition scan.
#[derive(Debug)]
pub enum Outcome {
    /// The landmark model found no face; the store was never scanned.
    NoFace,
    /// Best similarity did not clear the recognition threshold. The
    /// confidence is still reported even though it matched no one.
    NotRecognized { confidence: f32 },
    Recognized {
        name: String,
        confidence: f32,
        /// Landmark count from a fresh extraction pass; informational only.
        num_landmarks: usize,
    },
}

/// Result of a recognition operation. Detection info is always present,
/// whatever the outcome.
#[derive(Debug)]
pub struct Recognition {
    pub detection: DetectionInfo,
    pub outcome: Outcome,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Register {
        name: String,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<String, EngineError>>,
    },
    Recognize {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Recognition, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Register a face: decode, extract, duplicate-check, persist.
    pub async fn register(&self, name: String, image: Vec<u8>) -> Result<String, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Register {
                name,
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Recognize a face: decode, detect, extract, scan the whole store.
    pub async fn recognize(&self, image: Vec<u8>) -> Result<Recognition, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models synchronously (fail-fast at startup), then
/// enters the request loop.
pub fn spawn_engine(
    mesh_path: &str,
    detector_path: &str,
    store: DirStore,
    duplicate_threshold: f32,
    recognition_threshold: f32,
) -> Result<EngineHandle, EngineError> {
    let mut mesh = FaceMesh::load(mesh_path)?;
    tracing::info!(path = mesh_path, "face mesh model loaded");

    let mut detector = FaceDetector::load(detector_path)?;
    tracing::info!(path = detector_path, "face detector model loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("semblance-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Register { name, image, reply } => {
                        let result = run_register(
                            &mut mesh,
                            &store,
                            duplicate_threshold,
                            &name,
                            &image,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::Recognize { image, reply } => {
                        let result = run_recognize(
                            &mut mesh,
                            &mut detector,
                            &store,
                            recognition_threshold,
                            &image,
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

/// Trimmed, non-empty registration name. Path separator characters are
/// rejected because the record filename derives from the name.
fn validate_name(name: &str) -> Result<&str, EngineError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(EngineError::EmptyName);
    }
    if trimmed.contains(['/', '\\']) || trimmed.contains("..") {
        return Err(EngineError::InvalidName);
    }
    Ok(trimmed)
}

fn run_register(
    mesh: &mut FaceMesh,
    store: &impl FaceStore,
    duplicate_threshold: f32,
    name: &str,
    image_bytes: &[u8],
) -> Result<String, EngineError> {
    let name = validate_name(name)?;
    let image = decode_image(image_bytes)?;

    let Some(embedding) = mesh.extract(&image)? else {
        return Err(EngineError::NoFaceFound);
    };

    enroll(store, name, embedding, duplicate_threshold)
}

/// Duplicate-check-then-write. Runs only on the engine thread, so the
/// scan and the ordinal filename cannot race another registration.
fn enroll(
    store: &impl FaceStore,
    name: &str,
    embedding: Vec<f32>,
    duplicate_threshold: f32,
) -> Result<String, EngineError> {
    let records = store.list()?;

    if let Some((matched, similarity)) =
        types::find_duplicate(&records, &embedding, duplicate_threshold)
    {
        tracing::info!(
            name,
            matched = %matched.name,
            similarity,
            "registration rejected as duplicate"
        );
        return Err(EngineError::DuplicateFace { similarity });
    }

    let record = FaceRecord {
        name: name.to_string(),
        embedding,
    };
    let path = store.append(&record)?;
    tracing::info!(
        name,
        path = %path.display(),
        total = records.len() + 1,
        "face registered"
    );

    Ok(record.name)
}

fn run_recognize(
    mesh: &mut FaceMesh,
    detector: &mut FaceDetector,
    store: &impl FaceStore,
    recognition_threshold: f32,
    image_bytes: &[u8],
) -> Result<Recognition, EngineError> {
    let image = decode_image(image_bytes)?;

    let detection = match detector.detect(&image)? {
        Some(location) => DetectionInfo::found(location),
        None => DetectionInfo::not_found(),
    };

    let Some(embedding) = mesh.extract(&image)? else {
        return Ok(Recognition {
            detection,
            outcome: Outcome::NoFace,
        });
    };

    let records = store.list()?;
    let outcome = match classify(&records, &embedding, recognition_threshold) {
        Classified::Match { name, confidence } => {
            // Fresh extraction pass just to report the landmark count,
            // mirroring the upstream behavior of this field.
            let num_landmarks = mesh
                .extract(&image)?
                .map(|e| FaceMesh::landmark_count(&e))
                .unwrap_or(0);
            tracing::info!(name = %name, confidence, "face recognized");
            Outcome::Recognized {
                name,
                confidence,
                num_landmarks,
            }
        }
        Classified::NoMatch { confidence } => {
            tracing::debug!(confidence, "no registered face above threshold");
            Outcome::NotRecognized { confidence }
        }
    };

    Ok(Recognition { detection, outcome })
}

/// Threshold decision over a full gallery scan.
enum Classified {
    Match { name: String, confidence: f32 },
    NoMatch { confidence: f32 },
}

fn classify(records: &[FaceRecord], probe: &[f32], threshold: f32) -> Classified {
    match types::best_match(records, probe) {
        Some((record, similarity)) if similarity > threshold => Classified::Match {
            name: record.name.clone(),
            confidence: similarity,
        },
        Some((_, similarity)) => Classified::NoMatch {
            confidence: similarity,
        },
        // No record scored above 0 (or the store is empty): the best
        // similarity stays at its floor, always below threshold.
        None => Classified::NoMatch { confidence: 0.0 },
    }
}

fn decode_image(bytes: &[u8]) -> Result<RgbImage, EngineError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DirStore;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static TEST_DIR_SEQ: AtomicUsize = AtomicUsize::new(0);

    fn temp_store(tag: &str) -> (DirStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "semblance-engine-{tag}-{}-{}",
            std::process::id(),
            TEST_DIR_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let store = DirStore::open(&dir).unwrap();
        (store, dir)
    }

    fn records(store: &DirStore) -> Vec<FaceRecord> {
        store.list().unwrap()
    }

    #[test]
    fn test_validate_name_trims() {
        assert_eq!(validate_name("  alice  ").unwrap(), "alice");
    }

    #[test]
    fn test_validate_name_rejects_empty_and_whitespace() {
        assert!(matches!(validate_name(""), Err(EngineError::EmptyName)));
        assert!(matches!(validate_name("   "), Err(EngineError::EmptyName)));
    }

    #[test]
    fn test_validate_name_rejects_path_components() {
        assert!(matches!(
            validate_name("../etc/passwd"),
            Err(EngineError::InvalidName)
        ));
        assert!(matches!(
            validate_name("a/b"),
            Err(EngineError::InvalidName)
        ));
        assert!(matches!(
            validate_name("a\\b"),
            Err(EngineError::InvalidName)
        ));
    }

    #[test]
    fn test_enroll_persists_record() {
        let (store, dir) = temp_store("persist");
        let name = enroll(&store, "alice", vec![1.0, 0.0, 0.0], 0.95).unwrap();
        assert_eq!(name, "alice");
        assert_eq!(records(&store).len(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_enroll_rejects_duplicate_and_leaves_store_unchanged() {
        let (store, dir) = temp_store("duplicate");
        enroll(&store, "bob", vec![1.0, 0.0, 0.0], 0.95).unwrap();

        let err = enroll(&store, "bob again", vec![1.0, 0.0, 0.0], 0.95).unwrap_err();
        match err {
            EngineError::DuplicateFace { similarity } => {
                assert!((similarity - 1.0).abs() < 1e-6);
            }
            other => panic!("expected DuplicateFace, got {other:?}"),
        }
        assert_eq!(records(&store).len(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_enroll_allows_distinct_faces_same_name() {
        // Duplicate names with different embeddings are permitted.
        let (store, dir) = temp_store("same-name");
        enroll(&store, "carol", vec![1.0, 0.0, 0.0], 0.95).unwrap();
        enroll(&store, "carol", vec![0.0, 1.0, 0.0], 0.95).unwrap();
        assert_eq!(records(&store).len(), 2);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_classify_empty_store_reports_zero_confidence() {
        match classify(&[], &[1.0, 0.0], 0.85) {
            Classified::NoMatch { confidence } => assert_eq!(confidence, 0.0),
            Classified::Match { .. } => panic!("empty store must not match"),
        }
    }

    #[test]
    fn test_classify_negative_similarities_report_zero_confidence() {
        let gallery = vec![FaceRecord {
            name: "opposite".to_string(),
            embedding: vec![-1.0, 0.0],
        }];
        match classify(&gallery, &[1.0, 0.0], 0.85) {
            Classified::NoMatch { confidence } => assert_eq!(confidence, 0.0),
            Classified::Match { .. } => panic!("opposite embedding must not match"),
        }
    }

    #[test]
    fn test_classify_above_threshold_matches() {
        let gallery = vec![FaceRecord {
            name: "alice".to_string(),
            embedding: vec![1.0, 0.0, 0.0],
        }];
        match classify(&gallery, &[1.0, 0.0, 0.0], 0.85) {
            Classified::Match { name, confidence } => {
                assert_eq!(name, "alice");
                assert!((confidence - 1.0).abs() < 1e-6);
            }
            Classified::NoMatch { .. } => panic!("identical embedding must match"),
        }
    }

    #[test]
    fn test_classify_below_threshold_reports_best_similarity() {
        let gallery = vec![FaceRecord {
            name: "alice".to_string(),
            embedding: vec![1.0, 1.0, 0.0],
        }];
        // cos(45°) ≈ 0.707, below the recognition threshold.
        match classify(&gallery, &[1.0, 0.0, 0.0], 0.85) {
            Classified::NoMatch { confidence } => {
                assert!((confidence - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
            }
            Classified::Match { .. } => panic!("weak similarity must not match"),
        }
    }

    #[test]
    fn test_register_then_recognize_same_embedding() {
        // End-to-end over the matching/storage core: register an
        // embedding, then classify the identical probe against the store.
        let (store, dir) = temp_store("end-to-end");
        enroll(&store, "alice", vec![0.2, 0.4, 0.8], 0.95).unwrap();

        let gallery = records(&store);
        assert_eq!(gallery.len(), 1);
        match classify(&gallery, &[0.2, 0.4, 0.8], 0.85) {
            Classified::Match { name, confidence } => {
                assert_eq!(name, "alice");
                assert!((confidence - 1.0).abs() < 1e-6);
            }
            Classified::NoMatch { .. } => panic!("stored embedding must be recognized"),
        }
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_decode_image_rejects_garbage() {
        assert!(matches!(
            decode_image(&[0x00, 0x01, 0x02]),
            Err(EngineError::ImageDecode(_))
        ));
    }

    #[test]
    fn test_is_client_error_partition() {
        assert!(EngineError::EmptyName.is_client_error());
        assert!(EngineError::NoFaceFound.is_client_error());
        assert!(EngineError::DuplicateFace { similarity: 0.99 }.is_client_error());
        assert!(!EngineError::ChannelClosed.is_client_error());
    }

    #[test]
    fn test_duplicate_error_reports_percentage() {
        let err = EngineError::DuplicateFace { similarity: 0.973 };
        assert_eq!(
            err.to_string(),
            "face already registered (similarity: 97.3%)"
        );
    }
}
