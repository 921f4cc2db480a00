//! Storage layer for Presage
//!
//! Coordinates the SQLite session/prediction store and the on-disk layout
//! for the vector index snapshot.

pub mod database;

use crate::error::{PresageError, Result};
use std::path::PathBuf;
use std::sync::Arc;

pub use database::{Database, DbPool, DbStats, PredictionRecord, SessionSummary, StoredMessage};

/// Storage manager that owns the database and the data directory layout
pub struct StorageManager {
    pub database: Arc<Database>,
    data_dir: PathBuf,
}

impl StorageManager {
    /// Create a new storage manager rooted at `data_dir`
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        let index_dir = data_dir.join("index");
        std::fs::create_dir_all(&index_dir).map_err(|e| PresageError::Io {
            source: e,
            context: format!("Failed to create index directory: {}", index_dir.display()),
        })?;

        let db_path = data_dir.join("presage.db");
        let database = Arc::new(Database::new(&db_path)?);

        Ok(Self { database, data_dir })
    }

    /// Root data directory
    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Directory holding the vector index snapshot pair
    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_storage_manager_creation() {
        let temp = TempDir::new().unwrap();
        let storage = StorageManager::new(temp.path().to_path_buf()).unwrap();

        assert!(storage.index_dir().exists());
        assert!(storage.data_dir().join("presage.db").exists());
    }
}
