//! Flat vector index over embedded document chunks
//!
//! Stores embeddings and their source chunks in lock-step (vector *i*
//! belongs to chunk *i*) and answers similarity queries by exact
//! squared-Euclidean scan. Corpora are small (thousands of chunks), so the
//! flat scan keeps the ordering contract exact: ascending distance, ties
//! resolved by insertion order.
//!
//! The index persists as a pair of co-located snapshot artifacts (vectors +
//! chunk list) that are only ever read or written together. A missing or
//! corrupt half discards the whole snapshot and starts empty.

mod snapshot;
mod vector_index;

pub use vector_index::{IndexError, SearchHit, VectorIndex};

use serde::{Deserialize, Serialize};

/// Metadata attached to each indexed chunk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    /// Source document name (file name at ingestion time)
    pub name: String,

    /// Position of this chunk within its source document
    pub chunk_index: usize,

    /// Media type of the source document, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl ChunkMetadata {
    pub fn new(name: impl Into<String>, chunk_index: usize) -> Self {
        Self {
            name: name.into(),
            chunk_index,
            media_type: None,
        }
    }
}

/// An indexed document chunk. Immutable once added.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}
