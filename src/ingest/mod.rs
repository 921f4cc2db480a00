//! Document ingestion
//!
//! Accepts text, markdown, and PDF files, splits them into fixed-size
//! non-overlapping word chunks, and forwards the chunks to the vector
//! index. PDF text extraction shells out to the `pdftotext` binary; a
//! missing binary fails that one ingestion, nothing else.

use crate::error::{PresageError, Result};
use crate::index::{ChunkMetadata, VectorIndex};
use serde::Serialize;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Words per chunk, non-overlapping
pub const WORDS_PER_CHUNK: usize = 1000;

/// Outcome of ingesting one document
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub name: String,
    pub chunks: usize,
}

/// Chunks documents and feeds them to the vector index
pub struct DocumentIngestor {
    index: Arc<RwLock<VectorIndex>>,
}

impl DocumentIngestor {
    pub fn new(index: Arc<RwLock<VectorIndex>>) -> Self {
        Self { index }
    }

    /// Ingest a file from disk, dispatching on its extension
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestReport> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| PresageError::Ingest(format!("Invalid file name: {:?}", path)))?
            .to_string();

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        let (text, media_type) = match extension.as_str() {
            "txt" => (read_text(path)?, "text/plain"),
            "md" | "markdown" => (read_text(path)?, "text/markdown"),
            "pdf" => (extract_pdf_text(path)?, "application/pdf"),
            other => {
                return Err(PresageError::Ingest(format!(
                    "Unsupported file type: .{} (supported: .txt, .md, .pdf)",
                    other
                )));
            }
        };

        let chunks = self.ingest_text(&name, media_type, &text).await?;
        Ok(IngestReport { name, chunks })
    }

    /// Chunk raw text and add it to the index under `name`
    pub async fn ingest_text(&self, name: &str, media_type: &str, text: &str) -> Result<usize> {
        if text.trim().is_empty() {
            return Err(PresageError::Ingest(format!(
                "No text content extracted from {}",
                name
            )));
        }

        let chunks = chunk_words(text, WORDS_PER_CHUNK);
        let count = chunks.len();

        let items = chunks
            .into_iter()
            .enumerate()
            .map(|(chunk_index, chunk)| {
                let mut metadata = ChunkMetadata::new(name, chunk_index);
                metadata.media_type = Some(media_type.to_string());
                (chunk, metadata)
            })
            .collect();

        self.index.write().await.add(items)?;

        tracing::info!("Ingested {} as {} chunks", name, count);
        Ok(count)
    }
}

/// Split text into fixed-size non-overlapping word chunks
fn chunk_words(text: &str, words_per_chunk: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(words_per_chunk)
        .map(|chunk| chunk.join(" "))
        .collect()
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| PresageError::Io {
        source: e,
        context: format!("Failed to read document: {}", path.display()),
    })
}

/// Extract PDF text via the pdftotext system binary
fn extract_pdf_text(path: &Path) -> Result<String> {
    let output = Command::new("pdftotext")
        .arg(path)
        .arg("-")
        .output()
        .map_err(|e| PresageError::Ingest(format!("Failed to run pdftotext: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PresageError::Ingest(format!(
            "pdftotext failed for {}: {}",
            path.display(),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingError, EmbeddingProvider};
    use tempfile::TempDir;

    struct ConstantEmbedder;

    impl EmbeddingProvider for ConstantEmbedder {
        fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }

        fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "constant"
        }
    }

    fn ingestor() -> (DocumentIngestor, Arc<RwLock<VectorIndex>>) {
        let index = Arc::new(RwLock::new(VectorIndex::open(
            Arc::new(ConstantEmbedder),
            0.0,
            None,
        )));
        (DocumentIngestor::new(index.clone()), index)
    }

    #[test]
    fn test_chunk_words_boundaries() {
        let text = (0..2500).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let chunks = chunk_words(&text, 1000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].split_whitespace().count(), 1000);
        assert_eq!(chunks[2].split_whitespace().count(), 500);
    }

    #[test]
    fn test_chunk_words_small_input() {
        let chunks = chunk_words("just a few words", 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "just a few words");
    }

    #[tokio::test]
    async fn test_ingest_markdown_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notes.md");
        std::fs::write(&path, "# Caching\n\nCaching stores frequently used data.").unwrap();

        let (ingestor, index) = ingestor();
        let report = ingestor.ingest_file(&path).await.unwrap();

        assert_eq!(report.name, "notes.md");
        assert_eq!(report.chunks, 1);

        let guard = index.read().await;
        assert_eq!(guard.len(), 1);
        assert_eq!(guard.document_names(), vec!["notes.md"]);
    }

    #[tokio::test]
    async fn test_unsupported_extension_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("image.png");
        std::fs::write(&path, "not really an image").unwrap();

        let (ingestor, _index) = ingestor();
        let result = ingestor.ingest_file(&path).await;
        assert!(matches!(result, Err(PresageError::Ingest(_))));
    }

    #[tokio::test]
    async fn test_empty_document_is_rejected() {
        let (ingestor, _index) = ingestor();
        let result = ingestor.ingest_text("empty.txt", "text/plain", "   \n  ").await;
        assert!(matches!(result, Err(PresageError::Ingest(_))));
    }
}
