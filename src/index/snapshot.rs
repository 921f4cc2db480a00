//! Paired snapshot persistence for the vector index
//!
//! Two artifacts live side by side in the snapshot directory: the embedding
//! vectors and the parallel chunk list. They are written together and read
//! together; a snapshot with a missing half, an unparseable half, or a
//! length mismatch between halves is treated as corrupt in its entirety.

use crate::index::DocumentChunk;
use std::path::{Path, PathBuf};
use thiserror::Error;

const VECTORS_FILE: &str = "vectors.json";
const CHUNKS_FILE: &str = "chunks.json";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot half missing: {0}")]
    MissingHalf(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("snapshot halves disagree: {vectors} vectors, {chunks} chunks")]
    LengthMismatch { vectors: usize, chunks: usize },
}

pub(crate) fn vectors_path(dir: &Path) -> PathBuf {
    dir.join(VECTORS_FILE)
}

pub(crate) fn chunks_path(dir: &Path) -> PathBuf {
    dir.join(CHUNKS_FILE)
}

/// Load both snapshot halves.
///
/// Returns `Ok(None)` when neither half exists (fresh index). Any other
/// inconsistency is an error; the caller discards the snapshot as a whole.
pub(crate) fn load(
    dir: &Path,
) -> Result<Option<(Vec<Vec<f32>>, Vec<DocumentChunk>)>, SnapshotError> {
    let vectors_path = vectors_path(dir);
    let chunks_path = chunks_path(dir);

    match (vectors_path.exists(), chunks_path.exists()) {
        (false, false) => return Ok(None),
        (true, false) => return Err(SnapshotError::MissingHalf(CHUNKS_FILE.to_string())),
        (false, true) => return Err(SnapshotError::MissingHalf(VECTORS_FILE.to_string())),
        (true, true) => {}
    }

    let vectors: Vec<Vec<f32>> = read_half(&vectors_path)?;
    let chunks: Vec<DocumentChunk> = read_half(&chunks_path)?;

    if vectors.len() != chunks.len() {
        return Err(SnapshotError::LengthMismatch {
            vectors: vectors.len(),
            chunks: chunks.len(),
        });
    }

    Ok(Some((vectors, chunks)))
}

/// Write both snapshot halves.
pub(crate) fn save(
    dir: &Path,
    vectors: &[Vec<f32>],
    chunks: &[DocumentChunk],
) -> Result<(), SnapshotError> {
    std::fs::create_dir_all(dir).map_err(|e| SnapshotError::Write {
        path: dir.to_path_buf(),
        source: e,
    })?;

    write_half(&vectors_path(dir), vectors)?;
    write_half(&chunks_path(dir), chunks)?;

    Ok(())
}

fn read_half<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, SnapshotError> {
    let content = std::fs::read_to_string(path).map_err(|e| SnapshotError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| SnapshotError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_half<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), SnapshotError> {
    let content = serde_json::to_string(value).map_err(|e| SnapshotError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    std::fs::write(path, content).map_err(|e| SnapshotError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}
