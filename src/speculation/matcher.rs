//! Match-and-serve: deciding whether a cached speculative answer satisfies
//! an incoming question
//!
//! The gate is deliberately crude: token-set Jaccard overlap between the
//! incoming message and the prediction's source question. It is a cheap
//! accept/reject check, not a ranking function; a semantic match here would
//! change acceptance behavior.

use crate::cache::{CacheKind, CacheStore};
use crate::config::PredictionConfig;
use crate::speculation::SpeculativeAnswer;
use crate::storage::Database;
use std::collections::HashSet;
use std::sync::Arc;

/// A cached answer accepted for an incoming message
#[derive(Debug, Clone)]
pub struct PrecomputedHit {
    pub answer_id: String,
    pub answer: SpeculativeAnswer,
}

/// Looks up and gates cached speculative answers for arriving questions
pub struct AnswerMatcher {
    cache: Arc<CacheStore>,
    database: Arc<Database>,
    config: PredictionConfig,
}

impl AnswerMatcher {
    pub fn new(cache: Arc<CacheStore>, database: Arc<Database>, config: PredictionConfig) -> Self {
        Self {
            cache,
            database,
            config,
        }
    }

    /// Try to satisfy `message` from the session's most recent speculative
    /// answer. Returns `None` on any miss: no prediction, confidence below
    /// the threshold at generation time, insufficient word overlap, or an
    /// expired/absent cache entry. Never fails.
    pub fn match_answer(&self, session_id: &str, message: &str) -> Option<PrecomputedHit> {
        let prediction = match self.database.latest_prediction(session_id) {
            Ok(prediction) => prediction?,
            Err(e) => {
                tracing::warn!("Prediction lookup failed, skipping precomputed path: {}", e);
                return None;
            }
        };

        if prediction.confidence < self.config.confidence_threshold {
            return None;
        }
        let answer_id = prediction.answer_id?;

        let overlap = lexical_overlap(message, &prediction.predicted_question);
        if overlap <= self.config.match_overlap_threshold {
            tracing::debug!(
                "Precomputed answer rejected: overlap {:.2} below {:.2}",
                overlap,
                self.config.match_overlap_threshold
            );
            return None;
        }

        let answer: SpeculativeAnswer = self.cache.get(CacheKind::Answer, &answer_id)?;

        tracing::info!(
            "Serving precomputed answer {} (overlap {:.2})",
            answer_id,
            overlap
        );

        Some(PrecomputedHit { answer_id, answer })
    }
}

/// Token-set Jaccard overlap of the lowercased word sets of two strings
pub fn lexical_overlap(a: &str, b: &str) -> f32 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();

    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();

    intersection as f32 / union as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::PredictionRecord;
    use tempfile::TempDir;

    fn setup() -> (TempDir, AnswerMatcher, Arc<CacheStore>, Arc<Database>) {
        let temp = TempDir::new().unwrap();
        let database = Arc::new(Database::new(&temp.path().join("test.db")).unwrap());
        let cache = Arc::new(CacheStore::new());
        let config = Config::default();
        let matcher = AnswerMatcher::new(cache.clone(), database.clone(), config.prediction);
        (temp, matcher, cache, database)
    }

    fn store_prediction(
        database: &Database,
        cache: &CacheStore,
        question: &str,
        confidence: f32,
        answer_id: &str,
    ) {
        cache.set(
            CacheKind::Answer,
            answer_id,
            &SpeculativeAnswer {
                answer: "a precomputed answer".to_string(),
                source_question: question.to_string(),
                context_documents: vec![],
            },
            7200,
        );
        database
            .insert_prediction(&PredictionRecord {
                session_id: "s1".to_string(),
                predicted_question: question.to_string(),
                confidence,
                topics: vec![],
                planned_documents: vec![],
                answer_id: Some(answer_id.to_string()),
                created_at: 100,
            })
            .unwrap();
    }

    #[test]
    fn test_overlap_values() {
        assert_eq!(lexical_overlap("what is x", "what is x"), 1.0);
        assert_eq!(lexical_overlap("", "what is x"), 0.0);

        // "explain x in detail" vs "what is x": intersection {x},
        // union {explain, x, in, detail, what, is}
        let overlap = lexical_overlap("explain x in detail", "what is x");
        assert!((overlap - 1.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_high_overlap_serves_cached_answer() {
        let (_temp, matcher, cache, database) = setup();
        store_prediction(
            &database,
            &cache,
            "how does cache eviction work",
            0.85,
            "spec_abc",
        );

        let hit = matcher
            .match_answer("s1", "how does cache eviction work")
            .unwrap();
        assert_eq!(hit.answer_id, "spec_abc");
        assert_eq!(hit.answer.answer, "a precomputed answer");
    }

    #[test]
    fn test_low_overlap_is_rejected() {
        let (_temp, matcher, cache, database) = setup();
        store_prediction(
            &database,
            &cache,
            "how does cache eviction work",
            0.85,
            "spec_abc",
        );

        assert!(matcher.match_answer("s1", "what's the weather").is_none());
    }

    #[test]
    fn test_low_confidence_is_rejected() {
        let (_temp, matcher, cache, database) = setup();
        store_prediction(
            &database,
            &cache,
            "how does cache eviction work",
            0.5,
            "spec_abc",
        );

        assert!(matcher
            .match_answer("s1", "how does cache eviction work")
            .is_none());
    }

    #[test]
    fn test_expired_cache_entry_is_a_miss() {
        let (_temp, matcher, cache, database) = setup();
        cache.set(
            CacheKind::Answer,
            "spec_old",
            &SpeculativeAnswer {
                answer: "stale".to_string(),
                source_question: "q".to_string(),
                context_documents: vec![],
            },
            -1,
        );
        database
            .insert_prediction(&PredictionRecord {
                session_id: "s1".to_string(),
                predicted_question: "how does cache eviction work".to_string(),
                confidence: 0.9,
                topics: vec![],
                planned_documents: vec![],
                answer_id: Some("spec_old".to_string()),
                created_at: 100,
            })
            .unwrap();

        assert!(matcher
            .match_answer("s1", "how does cache eviction work")
            .is_none());
    }

    #[test]
    fn test_no_prediction_is_a_miss() {
        let (_temp, matcher, _cache, _database) = setup();
        assert!(matcher.match_answer("s1", "anything at all").is_none());
    }
}
