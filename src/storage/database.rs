//! SQLite database management with migrations
//!
//! Structured storage for chat sessions, their append-only message logs,
//! and prediction records.

use crate::error::{PresageError, Result};
use crate::llm::Role;
use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// A message in a session log
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub created_at: i64,
}

/// Summary of a chat session for listings
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    pub message_count: usize,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A persisted prediction with its precomputed answer handle
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PredictionRecord {
    pub session_id: String,
    pub predicted_question: String,
    pub confidence: f32,
    pub topics: Vec<String>,
    pub planned_documents: Vec<String>,
    pub answer_id: Option<String>,
    pub created_at: i64,
}

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PresageError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);

        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| PresageError::Config(format!("Failed to create connection pool: {}", e)))?;

        {
            let conn = pool
                .get()
                .map_err(|e| PresageError::Config(format!("Failed to get connection: {}", e)))?;

            // WAL mode for concurrent readers alongside the writer
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| PresageError::Config(format!("Failed to get connection: {}", e)))
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Create the session row if it does not exist yet
    pub fn ensure_session(&self, session_id: &str) -> Result<()> {
        let conn = self.get_conn()?;
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO sessions (id, created_at, updated_at) VALUES (?1, ?2, ?2)
             ON CONFLICT(id) DO NOTHING",
            params![session_id, now],
        )?;

        Ok(())
    }

    /// Append a message to a session's log
    pub fn append_message(&self, session_id: &str, role: Role, content: &str) -> Result<()> {
        self.ensure_session(session_id)?;

        let conn = self.get_conn()?;
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO messages (session_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, role.as_str(), content, now],
        )?;

        conn.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            params![now, session_id],
        )?;

        Ok(())
    }

    /// Load a session's message log in chronological order
    pub fn get_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        let conn = self.get_conn()?;

        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;

        if exists.is_none() {
            return Err(PresageError::SessionNotFound {
                id: session_id.to_string(),
            });
        }

        let mut stmt = conn.prepare(
            "SELECT role, content, created_at FROM messages
             WHERE session_id = ?1 ORDER BY id ASC",
        )?;

        let messages = stmt
            .query_map(params![session_id], |row| {
                Ok(StoredMessage {
                    role: row.get(0)?,
                    content: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(messages)
    }

    /// List sessions, most recently active first
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT s.id, s.created_at, s.updated_at,
                    (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id),
                    COALESCE((SELECT content FROM messages m WHERE m.session_id = s.id
                              ORDER BY m.id ASC LIMIT 1), '')
             FROM sessions s ORDER BY s.updated_at DESC LIMIT ?1",
        )?;

        let sessions = stmt
            .query_map(params![limit as i64], |row| {
                let first_message: String = row.get(4)?;
                let count: i64 = row.get(3)?;
                Ok(SessionSummary {
                    session_id: row.get(0)?,
                    created_at: row.get(1)?,
                    updated_at: row.get(2)?,
                    message_count: count as usize,
                    title: title_from_message(&first_message),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    /// Delete a session, its messages, and its predictions
    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let conn = self.get_conn()?;

        let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        if deleted == 0 {
            return Err(PresageError::SessionNotFound {
                id: session_id.to_string(),
            });
        }

        conn.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            params![session_id],
        )?;
        conn.execute(
            "DELETE FROM predictions WHERE session_id = ?1",
            params![session_id],
        )?;

        Ok(())
    }

    /// Persist a prediction record
    pub fn insert_prediction(&self, record: &PredictionRecord) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "INSERT INTO predictions
             (session_id, predicted_question, confidence, topics, planned_documents,
              answer_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.session_id,
                record.predicted_question,
                record.confidence as f64,
                serde_json::to_string(&record.topics).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(&record.planned_documents)
                    .unwrap_or_else(|_| "[]".to_string()),
                record.answer_id,
                record.created_at,
            ],
        )?;

        Ok(())
    }

    /// Most recent prediction for a session, if any
    pub fn latest_prediction(&self, session_id: &str) -> Result<Option<PredictionRecord>> {
        let conn = self.get_conn()?;

        let record = conn
            .query_row(
                "SELECT session_id, predicted_question, confidence, topics,
                        planned_documents, answer_id, created_at
                 FROM predictions WHERE session_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![session_id],
                |row| {
                    let confidence: f64 = row.get(2)?;
                    let topics: String = row.get(3)?;
                    let planned: String = row.get(4)?;
                    Ok(PredictionRecord {
                        session_id: row.get(0)?,
                        predicted_question: row.get(1)?,
                        confidence: confidence as f32,
                        topics: serde_json::from_str(&topics).unwrap_or_default(),
                        planned_documents: serde_json::from_str(&planned).unwrap_or_default(),
                        answer_id: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()?;

        Ok(record)
    }

    /// User-authored messages across the most recent sessions, oldest first
    pub fn recent_user_messages(&self, session_limit: usize) -> Result<Vec<String>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT m.content FROM messages m
             JOIN (SELECT id FROM sessions ORDER BY updated_at DESC LIMIT ?1) s
               ON m.session_id = s.id
             WHERE m.role = 'user' ORDER BY m.id ASC",
        )?;

        let messages = stmt
            .query_map(params![session_limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(messages)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let session_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        let message_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        let prediction_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM predictions", [], |row| row.get(0))?;

        Ok(DbStats {
            session_count: session_count as usize,
            message_count: message_count as usize,
            prediction_count: prediction_count as usize,
        })
    }
}

fn title_from_message(content: &str) -> String {
    if content.is_empty() {
        return "New Conversation".to_string();
    }
    crate::predictor::truncate_chars(content, 50).to_string()
}

/// Database statistics
#[derive(Debug, serde::Serialize)]
pub struct DbStats {
    pub session_count: usize,
    pub message_count: usize,
    pub prediction_count: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Chat sessions
    CREATE TABLE sessions (
        id TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX idx_sessions_updated_at ON sessions(updated_at);

    -- Append-only message log per session
    CREATE TABLE messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX idx_messages_session ON messages(session_id, id);

    -- Prediction records with precomputed answer handles
    CREATE TABLE predictions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        predicted_question TEXT NOT NULL,
        confidence REAL NOT NULL,
        topics TEXT NOT NULL,
        planned_documents TEXT NOT NULL,
        answer_id TEXT,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX idx_predictions_session ON predictions(session_id, created_at);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_db() -> (TempDir, Database) {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("test.db")).unwrap();
        (temp, db)
    }

    #[test]
    fn test_message_log_roundtrip() {
        let (_temp, db) = test_db();

        db.append_message("s1", Role::User, "what is caching?")
            .unwrap();
        db.append_message("s1", Role::Assistant, "Caching stores data...")
            .unwrap();

        let messages = db.get_messages("s1").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
    }

    #[test]
    fn test_missing_session_is_not_found() {
        let (_temp, db) = test_db();
        let result = db.get_messages("nope");
        assert!(matches!(
            result,
            Err(PresageError::SessionNotFound { .. })
        ));
    }

    #[test]
    fn test_latest_prediction_orders_by_recency() {
        let (_temp, db) = test_db();

        db.insert_prediction(&PredictionRecord {
            session_id: "s1".to_string(),
            predicted_question: "older".to_string(),
            confidence: 0.9,
            topics: vec!["a".to_string()],
            planned_documents: vec![],
            answer_id: Some("spec_1".to_string()),
            created_at: 100,
        })
        .unwrap();

        db.insert_prediction(&PredictionRecord {
            session_id: "s1".to_string(),
            predicted_question: "newer".to_string(),
            confidence: 0.85,
            topics: vec![],
            planned_documents: vec!["doc.md".to_string()],
            answer_id: Some("spec_2".to_string()),
            created_at: 200,
        })
        .unwrap();

        let latest = db.latest_prediction("s1").unwrap().unwrap();
        assert_eq!(latest.predicted_question, "newer");
        assert_eq!(latest.answer_id.as_deref(), Some("spec_2"));
        assert_eq!(latest.planned_documents, vec!["doc.md"]);

        assert!(db.latest_prediction("s2").unwrap().is_none());
    }

    #[test]
    fn test_session_listing_and_delete() {
        let (_temp, db) = test_db();

        db.append_message("s1", Role::User, "first question about rust")
            .unwrap();
        db.append_message("s2", Role::User, "another topic").unwrap();

        let sessions = db.list_sessions(10).unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions
            .iter()
            .any(|s| s.title == "first question about rust"));

        db.delete_session("s1").unwrap();
        assert!(db.get_messages("s1").is_err());
        assert!(db.delete_session("s1").is_err());
    }

    #[test]
    fn test_recent_user_messages_filters_role() {
        let (_temp, db) = test_db();

        db.append_message("s1", Role::User, "user line").unwrap();
        db.append_message("s1", Role::Assistant, "assistant line")
            .unwrap();

        let messages = db.recent_user_messages(5).unwrap();
        assert_eq!(messages, vec!["user line"]);
    }

    #[test]
    fn test_stats() {
        let (_temp, db) = test_db();
        db.append_message("s1", Role::User, "hello").unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.session_count, 1);
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.prediction_count, 0);
    }
}
