use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::index::snapshot;
use crate::index::{ChunkMetadata, DocumentChunk};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Embedder returned {actual} vectors for {expected} chunks")]
    EmbeddingCountMismatch { expected: usize, actual: usize },
}

/// A single retrieval result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Squared Euclidean distance between query and chunk embeddings
    pub distance: f32,
    /// `1.0 - distance`; an exact text match scores 1.0
    pub similarity: f32,
}

/// Flat exact vector index
///
/// Callers share one instance per process as
/// `Arc<tokio::sync::RwLock<VectorIndex>>`: `add` takes the write lock
/// (mutation and snapshot persistence are not atomic with respect to
/// concurrent structural changes), `search` and `get_by_names` the read
/// lock.
pub struct VectorIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Vec<Vec<f32>>,
    chunks: Vec<DocumentChunk>,
    similarity_threshold: f32,
    snapshot_dir: Option<PathBuf>,
}

impl VectorIndex {
    /// Open an index, loading a persisted snapshot when one exists.
    ///
    /// A malformed snapshot is not fatal: it is discarded with a warning
    /// and the index starts empty. Pass `None` for `snapshot_dir` to run
    /// purely in memory.
    pub fn open(
        embedder: Arc<dyn EmbeddingProvider>,
        similarity_threshold: f32,
        snapshot_dir: Option<PathBuf>,
    ) -> Self {
        let (vectors, chunks) = match snapshot_dir.as_deref().map(snapshot::load) {
            Some(Ok(Some((vectors, chunks)))) => {
                tracing::info!("Loaded vector index snapshot with {} chunks", chunks.len());
                (vectors, chunks)
            }
            Some(Ok(None)) | None => (Vec::new(), Vec::new()),
            Some(Err(e)) => {
                tracing::warn!("Discarding unreadable vector index snapshot: {}", e);
                (Vec::new(), Vec::new())
            }
        };

        let mut index = Self {
            embedder,
            vectors,
            chunks,
            similarity_threshold,
            snapshot_dir,
        };

        // A snapshot produced by a different embedding model is as useless
        // as a corrupt one
        if let Some(vector) = index.vectors.first() {
            if vector.len() != index.embedder.dimension() {
                tracing::warn!(
                    "Discarding vector index snapshot: dimension {} does not match embedder dimension {}",
                    vector.len(),
                    index.embedder.dimension()
                );
                index.vectors.clear();
                index.chunks.clear();
            }
        }

        index
    }

    /// Embed and append chunks, then persist the snapshot.
    ///
    /// Vectors and chunks stay in lock-step: the vector at position *i*
    /// always belongs to the chunk at position *i*. Persistence is
    /// best-effort; a write failure leaves the in-memory index updated and
    /// is logged, never raised. An embedder failure aborts the whole call
    /// with nothing appended.
    pub fn add(&mut self, items: Vec<(String, ChunkMetadata)>) -> Result<(), IndexError> {
        if items.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = items.iter().map(|(text, _)| text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;

        if embeddings.len() != items.len() {
            return Err(IndexError::EmbeddingCountMismatch {
                expected: items.len(),
                actual: embeddings.len(),
            });
        }

        for (embedding, (text, metadata)) in embeddings.into_iter().zip(items) {
            self.vectors.push(embedding);
            self.chunks.push(DocumentChunk { text, metadata });
        }

        self.persist();

        tracing::info!("Vector index now holds {} chunks", self.chunks.len());
        Ok(())
    }

    /// Search for the `k` nearest chunks to `query`.
    ///
    /// Results come back ordered by ascending distance (ties keep insertion
    /// order), truncated to `k`, and filtered to similarities at or above
    /// the configured threshold. An empty index yields an empty result; an
    /// embedder failure propagates.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query)?;

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, vector)| (i, squared_distance(&query_embedding, vector)))
            .collect();

        // Stable sort keeps insertion order for equal distances
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let hits = scored
            .into_iter()
            .map(|(i, distance)| SearchHit {
                text: self.chunks[i].text.clone(),
                metadata: self.chunks[i].metadata.clone(),
                distance,
                similarity: 1.0 - distance,
            })
            .filter(|hit| hit.similarity >= self.similarity_threshold)
            .collect();

        Ok(hits)
    }

    /// Return all chunks whose metadata name is in `names`, in insertion order.
    pub fn get_by_names(&self, names: &HashSet<String>) -> Vec<DocumentChunk> {
        self.chunks
            .iter()
            .filter(|chunk| names.contains(&chunk.metadata.name))
            .cloned()
            .collect()
    }

    /// Distinct source document names, in first-seen order.
    pub fn document_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.chunks
            .iter()
            .filter(|chunk| seen.insert(chunk.metadata.name.clone()))
            .map(|chunk| chunk.metadata.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    fn persist(&self) {
        if let Some(dir) = &self.snapshot_dir {
            if let Err(e) = snapshot::save(dir, &self.vectors, &self.chunks) {
                tracing::error!("Failed to persist vector index snapshot: {}", e);
            }
        }
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Deterministic bag-of-words embedder: identical text maps to an
    /// identical unit vector, disjoint vocabularies to orthogonal ones.
    struct HashEmbedder {
        dimension: usize,
    }

    impl HashEmbedder {
        fn new() -> Self {
            Self { dimension: 32 }
        }
    }

    impl EmbeddingProvider for HashEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.is_empty() {
                return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
            }
            let mut vector = vec![0.0f32; self.dimension];
            for token in text.to_lowercase().split_whitespace() {
                let mut hash = 0usize;
                for byte in token.bytes() {
                    hash = hash.wrapping_mul(31).wrapping_add(byte as usize);
                }
                vector[hash % self.dimension] += 1.0;
            }
            let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for x in &mut vector {
                    *x /= norm;
                }
            }
            Ok(vector)
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            "hash-embedder"
        }
    }

    fn test_index(threshold: f32, snapshot_dir: Option<PathBuf>) -> VectorIndex {
        VectorIndex::open(Arc::new(HashEmbedder::new()), threshold, snapshot_dir)
    }

    fn chunk(text: &str, name: &str, index: usize) -> (String, ChunkMetadata) {
        (text.to_string(), ChunkMetadata::new(name, index))
    }

    #[test]
    fn test_empty_index_search() {
        let index = test_index(0.7, None);
        let hits = index.search("anything", 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_exact_text_scores_full_similarity() {
        let mut index = test_index(0.7, None);
        index
            .add(vec![
                chunk("caching stores frequently used data", "notes.md", 0),
                chunk("eviction removes stale entries", "notes.md", 1),
            ])
            .unwrap();

        let hits = index
            .search("caching stores frequently used data", 5)
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].text, "caching stores frequently used data");
        assert!(hits[0].distance.abs() < 1e-5);
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_search_respects_k_and_threshold() {
        let mut index = test_index(0.7, None);
        index
            .add(vec![
                chunk("alpha beta gamma", "a.md", 0),
                chunk("delta epsilon zeta", "a.md", 1),
                chunk("eta theta iota", "a.md", 2),
            ])
            .unwrap();

        let hits = index.search("alpha beta gamma", 2).unwrap();
        assert!(hits.len() <= 2);
        for hit in &hits {
            assert!(hit.similarity >= 0.7);
        }

        // An unrelated query is orthogonal to everything indexed and must
        // be filtered out entirely
        let hits = index.search("completely unrelated words", 3).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_get_by_names() {
        let mut index = test_index(0.0, None);
        index
            .add(vec![
                chunk("first", "a.md", 0),
                chunk("second", "b.md", 0),
                chunk("third", "a.md", 1),
            ])
            .unwrap();

        let names: HashSet<String> = ["a.md".to_string()].into_iter().collect();
        let chunks = index.get_by_names(&names);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "first");
        assert_eq!(chunks[1].text, "third");

        assert_eq!(index.document_names(), vec!["a.md", "b.md"]);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("index");

        {
            let mut index = test_index(0.7, Some(dir.clone()));
            index
                .add(vec![
                    chunk("persisted chunk one", "doc.md", 0),
                    chunk("persisted chunk two", "doc.md", 1),
                ])
                .unwrap();
        }

        let index = test_index(0.7, Some(dir));
        assert_eq!(index.len(), 2);
        let hits = index.search("persisted chunk one", 1).unwrap();
        assert_eq!(hits[0].text, "persisted chunk one");
    }

    #[test]
    fn test_corrupt_snapshot_degrades_to_empty() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("index");

        {
            let mut index = test_index(0.7, Some(dir.clone()));
            index.add(vec![chunk("some content", "doc.md", 0)]).unwrap();
        }

        std::fs::write(dir.join("chunks.json"), "{ not json").unwrap();

        let index = test_index(0.7, Some(dir));
        assert!(index.is_empty());
    }

    #[test]
    fn test_missing_half_discards_snapshot() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("index");

        {
            let mut index = test_index(0.7, Some(dir.clone()));
            index.add(vec![chunk("some content", "doc.md", 0)]).unwrap();
        }

        std::fs::remove_file(dir.join("vectors.json")).unwrap();

        let index = test_index(0.7, Some(dir));
        assert!(index.is_empty());
    }

    #[test]
    fn test_tie_break_by_insertion_order() {
        let mut index = test_index(0.0, None);
        // Identical text indexed twice: equal distance, first insertion wins
        index
            .add(vec![
                chunk("duplicate text", "first.md", 0),
                chunk("duplicate text", "second.md", 0),
            ])
            .unwrap();

        let hits = index.search("duplicate text", 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.name, "first.md");
        assert_eq!(hits[1].metadata.name, "second.md");
    }
}
