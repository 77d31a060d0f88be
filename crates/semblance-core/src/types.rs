use serde::{Deserialize, Serialize};

/// Default similarity above which a new registration is rejected as
/// already enrolled.
pub const DUPLICATE_THRESHOLD: f32 = 0.95;

/// Default similarity above which a probe is classified as a positive
/// identity match.
pub const RECOGNITION_THRESHOLD: f32 = 0.85;

/// A persisted face: human-readable label plus its landmark embedding.
///
/// Records are written once at registration and never mutated. The
/// embedding is the flattened (x, y, z) landmark sequence, so its length
/// is always 3 × the landmark count of the mesh model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRecord {
    pub name: String,
    pub embedding: Vec<f32>,
}

/// Absolute-pixel bounding box of a detected face.
///
/// Signed because the detector's relative coordinates can round slightly
/// past the image edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceLocation {
    pub left: i64,
    pub top: i64,
    pub width: i64,
    pub height: i64,
}

/// Coarse detection result reported alongside recognition responses.
/// Transient; plays no role in matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionInfo {
    pub face_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_location: Option<FaceLocation>,
}

impl DetectionInfo {
    pub fn found(location: FaceLocation) -> Self {
        Self {
            face_detected: true,
            face_location: Some(location),
        }
    }

    pub fn not_found() -> Self {
        Self {
            face_detected: false,
            face_location: None,
        }
    }
}

/// Cosine similarity between two embeddings: dot product over the product
/// of Euclidean norms.
///
/// Returns exactly 0.0 when either vector is empty or has zero norm —
/// never divides by zero, never fails.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

/// Full-scan best match: the stored record with the highest similarity to
/// the probe. Ties keep the first-seen record.
///
/// The running best starts at 0, so records that score at or below 0 are
/// never selected and the reported best similarity is floored at 0. An
/// empty gallery yields `None`.
pub fn best_match<'a>(records: &'a [FaceRecord], probe: &[f32]) -> Option<(&'a FaceRecord, f32)> {
    let mut best: Option<(&FaceRecord, f32)> = None;
    let mut best_sim = 0.0f32;

    for record in records {
        let sim = cosine_similarity(&record.embedding, probe);
        if sim > best_sim {
            best_sim = sim;
            best = Some((record, sim));
        }
    }

    best
}

/// First stored record whose similarity to the probe strictly exceeds the
/// threshold, with that similarity. Used for duplicate rejection at
/// registration time.
pub fn find_duplicate<'a>(
    records: &'a [FaceRecord],
    probe: &[f32],
    threshold: f32,
) -> Option<(&'a FaceRecord, f32)> {
    for record in records {
        let sim = cosine_similarity(&record.embedding, probe);
        if sim > threshold {
            return Some((record, sim));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, embedding: Vec<f32>) -> FaceRecord {
        FaceRecord {
            name: name.to_string(),
            embedding,
        }
    }

    #[test]
    fn test_similarity_symmetric() {
        let a = [0.3f32, -1.2, 0.7, 2.0];
        let b = [1.1f32, 0.4, -0.2, 0.9];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn test_similarity_self_is_one() {
        let a = [0.5f32, 1.5, -2.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_orthogonal() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_zero_norm_is_zero() {
        let zero = [0.0f32, 0.0, 0.0];
        let a = [1.0f32, 2.0, 3.0];
        assert_eq!(cosine_similarity(&zero, &a), 0.0);
        assert_eq!(cosine_similarity(&a, &zero), 0.0);
    }

    #[test]
    fn test_similarity_empty_is_zero() {
        let a = [1.0f32, 2.0];
        assert_eq!(cosine_similarity(&[], &a), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_best_match_empty_gallery() {
        assert!(best_match(&[], &[1.0, 0.0]).is_none());
    }

    #[test]
    fn test_best_match_picks_highest() {
        let records = vec![
            record("far", vec![0.0, 1.0, 0.0]),
            record("near", vec![1.0, 0.1, 0.0]),
            record("other", vec![0.0, 0.0, 1.0]),
        ];
        let (matched, sim) = best_match(&records, &[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(matched.name, "near");
        assert!(sim > 0.9);
    }

    #[test]
    fn test_best_match_tie_keeps_first_seen() {
        let records = vec![
            record("first", vec![1.0, 0.0]),
            record("second", vec![1.0, 0.0]),
        ];
        let (matched, sim) = best_match(&records, &[1.0, 0.0]).unwrap();
        assert_eq!(matched.name, "first");
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_best_match_ignores_nonpositive_similarities() {
        // A gallery where every record scores at or below 0 behaves like
        // an empty one: no record is selected, confidence stays 0.
        let records = vec![
            record("opposite", vec![-1.0, 0.0]),
            record("orthogonal", vec![0.0, 1.0]),
        ];
        assert!(best_match(&records, &[1.0, 0.0]).is_none());
    }

    #[test]
    fn test_find_duplicate_exceeds_threshold() {
        let records = vec![record("alice", vec![1.0, 0.0, 0.0])];
        let (matched, sim) = find_duplicate(&records, &[1.0, 0.0, 0.0], DUPLICATE_THRESHOLD).unwrap();
        assert_eq!(matched.name, "alice");
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_find_duplicate_threshold_is_strict() {
        // A similarity exactly at the threshold must not count as duplicate.
        let records = vec![record("alice", vec![1.0, 0.0])];
        assert!(find_duplicate(&records, &[1.0, 0.0], 1.0).is_none());
    }

    #[test]
    fn test_find_duplicate_distinct_face_passes() {
        let records = vec![record("alice", vec![1.0, 0.0, 0.0])];
        assert!(find_duplicate(&records, &[0.0, 1.0, 0.0], DUPLICATE_THRESHOLD).is_none());
    }
}
