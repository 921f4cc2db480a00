//! Namespaced key/value cache with per-entry expiry
//!
//! Three entry kinds share the store under distinct key prefixes so
//! identifiers can never collide across kinds. Expiry is lazy: entries are
//! checked on read, never swept. The store also models total backing-store
//! unavailability as a disabled mode where every `set`/`delete` is a no-op
//! and every `get` is an absence; callers cannot tell "never set",
//! "expired", and "store down" apart because the remediation (recompute) is
//! the same for all three.

use ahash::RandomState;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::CacheConfig;

/// Logical cache entry kinds, each with its own key namespace and TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// Intent prediction results
    Prediction,
    /// Speculative answers
    Answer,
    /// Retrieval query results
    Retrieval,
}

impl CacheKind {
    pub fn prefix(self) -> &'static str {
        match self {
            CacheKind::Prediction => "prediction",
            CacheKind::Answer => "answer",
            CacheKind::Retrieval => "retrieval",
        }
    }

    /// Configured TTL for this entry kind, in seconds
    pub fn ttl_seconds(self, config: &CacheConfig) -> i64 {
        match self {
            CacheKind::Prediction => config.prediction_ttl_secs,
            CacheKind::Answer => config.answer_ttl_secs,
            CacheKind::Retrieval => config.retrieval_ttl_secs,
        }
    }
}

struct Entry {
    value: serde_json::Value,
    expires_at: DateTime<Utc>,
}

/// In-process cache store
///
/// Safe for concurrent access from independent sessions; critical sections
/// only touch the map, never block on IO.
pub struct CacheStore {
    entries: Option<RwLock<HashMap<String, Entry, RandomState>>>,
}

impl CacheStore {
    /// Create an enabled store
    pub fn new() -> Self {
        Self {
            entries: Some(RwLock::new(HashMap::default())),
        }
    }

    /// Create a store where every operation is a no-op
    pub fn disabled() -> Self {
        Self { entries: None }
    }

    /// Create a store according to configuration
    pub fn from_config(config: &CacheConfig) -> Self {
        if config.enabled {
            Self::new()
        } else {
            tracing::info!("Cache disabled; running without answer reuse");
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    /// Store a value under `{kind}:{id}` for `ttl_seconds`.
    ///
    /// Never fails: a disabled store or an unserializable value degrades to
    /// a no-op.
    pub fn set<T: Serialize>(&self, kind: CacheKind, id: &str, value: &T, ttl_seconds: i64) {
        let Some(entries) = &self.entries else {
            return;
        };

        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Dropping uncacheable value for {}:{}: {}", kind.prefix(), id, e);
                return;
            }
        };

        let entry = Entry {
            value,
            expires_at: Utc::now() + Duration::seconds(ttl_seconds),
        };

        entries.write().unwrap().insert(make_key(kind, id), entry);
    }

    /// Fetch a value, enforcing expiry on read.
    ///
    /// Absence covers unset keys, expired entries, undecodable entries, and
    /// a disabled store alike.
    pub fn get<T: DeserializeOwned>(&self, kind: CacheKind, id: &str) -> Option<T> {
        let entries = self.entries.as_ref()?;
        let key = make_key(kind, id);

        let expired = {
            let guard = entries.read().unwrap();
            let entry = guard.get(&key)?;
            if Utc::now() < entry.expires_at {
                match serde_json::from_value(entry.value.clone()) {
                    Ok(value) => return Some(value),
                    Err(e) => {
                        tracing::warn!("Dropping undecodable cache entry {}: {}", key, e);
                        true
                    }
                }
            } else {
                true
            }
        };

        if expired {
            entries.write().unwrap().remove(&key);
        }
        None
    }

    /// Remove an entry. No-op when absent or disabled.
    pub fn delete(&self, kind: CacheKind, id: &str) {
        if let Some(entries) = &self.entries {
            entries.write().unwrap().remove(&make_key(kind, id));
        }
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

fn make_key(kind: CacheKind, id: &str) -> String {
    format!("{}:{}", kind.prefix(), id)
}

/// Stable hash for retrieval query cache keys
pub fn query_hash(query: &str) -> String {
    blake3::hash(query.as_bytes()).to_hex().to_string()
}
