//! Integration test: document ingestion and index snapshot persistence

use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::RwLock;

use presage::embedding::{EmbeddingError, EmbeddingProvider};
use presage::index::VectorIndex;
use presage::ingest::DocumentIngestor;
use presage::storage::StorageManager;

struct HashEmbedder;

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; 32];
        for token in text.to_lowercase().split_whitespace() {
            let mut hash = 0usize;
            for byte in token.bytes() {
                hash = hash.wrapping_mul(31).wrapping_add(byte as usize);
            }
            vector[hash % 32] += 1.0;
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
        32
    }

    fn model_name(&self) -> &str {
        "hash-embedder"
    }
}

fn open_index(storage: &StorageManager) -> Arc<RwLock<VectorIndex>> {
    Arc::new(RwLock::new(VectorIndex::open(
        Arc::new(HashEmbedder),
        0.0,
        Some(storage.index_dir()),
    )))
}

#[tokio::test]
async fn test_ingested_documents_survive_restart() {
    let temp = TempDir::new().unwrap();
    let storage = StorageManager::new(temp.path().to_path_buf()).unwrap();

    let doc_path = temp.path().join("caching.md");
    std::fs::write(
        &doc_path,
        "Caching stores frequently used data. Eviction removes stale entries \
         when the cache is full.",
    )
    .unwrap();

    {
        let index = open_index(&storage);
        let ingestor = DocumentIngestor::new(index.clone());
        let report = ingestor.ingest_file(&doc_path).await.unwrap();
        assert_eq!(report.name, "caching.md");
        assert_eq!(report.chunks, 1);
    }

    // A fresh open must see identical content through the snapshot pair
    let index = open_index(&storage);
    let guard = index.read().await;
    assert_eq!(guard.len(), 1);
    assert_eq!(guard.document_names(), vec!["caching.md"]);

    let hits = guard
        .search(
            "Caching stores frequently used data. Eviction removes stale entries \
             when the cache is full.",
            1,
        )
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    assert_eq!(hits[0].metadata.chunk_index, 0);
}

#[tokio::test]
async fn test_corrupt_snapshot_half_starts_empty() {
    let temp = TempDir::new().unwrap();
    let storage = StorageManager::new(temp.path().to_path_buf()).unwrap();

    let doc_path = temp.path().join("notes.txt");
    std::fs::write(&doc_path, "some indexed content").unwrap();

    {
        let index = open_index(&storage);
        let ingestor = DocumentIngestor::new(index.clone());
        ingestor.ingest_file(&doc_path).await.unwrap();
    }

    std::fs::write(storage.index_dir().join("vectors.json"), "corrupt").unwrap();

    // Not a crash, an empty index
    let index = open_index(&storage);
    assert!(index.read().await.is_empty());
}

#[tokio::test]
async fn test_multi_chunk_document_keeps_order() {
    let temp = TempDir::new().unwrap();
    let storage = StorageManager::new(temp.path().to_path_buf()).unwrap();

    // 2200 words: three chunks of 1000/1000/200
    let words: Vec<String> = (0..2200).map(|i| format!("word{}", i)).collect();
    let doc_path = temp.path().join("long.txt");
    std::fs::write(&doc_path, words.join(" ")).unwrap();

    let index = open_index(&storage);
    let ingestor = DocumentIngestor::new(index.clone());
    let report = ingestor.ingest_file(&doc_path).await.unwrap();
    assert_eq!(report.chunks, 3);

    let guard = index.read().await;
    let names: std::collections::HashSet<String> =
        ["long.txt".to_string()].into_iter().collect();
    let chunks = guard.get_by_names(&names);
    assert_eq!(chunks.len(), 3);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.metadata.chunk_index, i);
    }
    assert!(chunks[0].text.starts_with("word0 "));
    assert!(chunks[2].text.ends_with("word2199"));
}
