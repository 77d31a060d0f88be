//! File-per-record face store.
//!
//! One postcard-serialized record per registered face in a flat
//! directory, discovered by scanning for the `.face` extension. Records
//! are written once and never mutated; deletion is a manual operation.

use semblance_core::FaceRecord;
use std::path::{Path, PathBuf};
use thiserror::Error;

const FACE_RECORD_EXT: &str = "face";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("face store I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt face record {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: postcard::Error,
    },
    #[error("encoding face record: {0}")]
    Encode(postcard::Error),
}

/// Storage seam for registered faces. The directory scan can later be
/// replaced by an indexed backend without touching matching logic.
pub trait FaceStore {
    /// All persisted records, in storage iteration order (not stable).
    fn list(&self) -> Result<Vec<FaceRecord>, StoreError>;
    /// Persist a new record, returning the path it was written to.
    fn append(&self, record: &FaceRecord) -> Result<PathBuf, StoreError>;
}

/// Directory-backed store. Filenames are `{name}_{ordinal}.face` with the
/// ordinal taken as the record count at write time; the caller serializes
/// writes, so the count cannot race.
#[derive(Debug)]
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    /// Open the store, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn record_paths(&self) -> Result<Vec<PathBuf>, StoreError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(FACE_RECORD_EXT) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

impl FaceStore for DirStore {
    fn list(&self) -> Result<Vec<FaceRecord>, StoreError> {
        let mut records = Vec::new();
        for path in self.record_paths()? {
            let data = std::fs::read(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            let record = postcard::from_bytes(&data)
                .map_err(|source| StoreError::Corrupt { path, source })?;
            records.push(record);
        }
        Ok(records)
    }

    fn append(&self, record: &FaceRecord) -> Result<PathBuf, StoreError> {
        let ordinal = self.record_paths()?.len();
        let path = self
            .dir
            .join(format!("{}_{ordinal}.{FACE_RECORD_EXT}", record.name));

        let data = postcard::to_allocvec(record).map_err(StoreError::Encode)?;
        std::fs::write(&path, data).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}
