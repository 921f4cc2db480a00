//! Topic expansion and document prefetch planning

use crate::config::IndexConfig;
use crate::index::VectorIndex;
use crate::llm::{self, ChatMessage, LanguageModel};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Maximum topics returned by expansion
const MAX_TOPICS: usize = 5;

/// Minimum token length kept by the keyword fallback
const MIN_KEYWORD_LEN: usize = 4;

/// Tokens the keyword fallback drops outright
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "do", "does", "did", "how", "what", "why",
    "when", "where",
];

#[derive(Deserialize)]
struct TopicsPayload {
    topics: Vec<String>,
}

/// Expands a predicted question into topics and a document prefetch plan
pub struct TopicExpander {
    llm: Arc<dyn LanguageModel>,
    index: Arc<RwLock<VectorIndex>>,
    index_config: IndexConfig,
}

impl TopicExpander {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        index: Arc<RwLock<VectorIndex>>,
        index_config: IndexConfig,
    ) -> Self {
        Self {
            llm,
            index,
            index_config,
        }
    }

    /// Expand a question into 3-5 topic strings.
    ///
    /// Falls back to naive keyword extraction when the language model is
    /// unavailable or returns garbage. Never fails.
    pub async fn expand_topics(&self, question: &str) -> Vec<String> {
        match self.request_topics(question).await {
            Ok(topics) if !topics.is_empty() => topics,
            Ok(_) => {
                tracing::warn!("Topic expansion returned nothing, using keyword fallback");
                extract_keywords(question)
            }
            Err(e) => {
                tracing::warn!("Topic expansion degraded to keyword fallback: {}", e);
                extract_keywords(question)
            }
        }
    }

    /// Plan which documents to prefetch for a predicted question.
    ///
    /// Searches the index with the question and topics combined and
    /// collects the distinct document names in result order. Errors degrade
    /// to an empty plan.
    pub async fn plan_documents(&self, question: &str, topics: &[String]) -> Vec<String> {
        let query = if topics.is_empty() {
            question.to_string()
        } else {
            format!("{} {}", question, topics.join(" "))
        };

        let hits = {
            let index = self.index.read().await;
            match index.search(&query, self.index_config.top_k) {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!("Document planning search failed: {}", e);
                    return Vec::new();
                }
            }
        };

        let mut seen = HashSet::new();
        hits.into_iter()
            .map(|hit| hit.metadata.name)
            .filter(|name| !name.is_empty() && seen.insert(name.clone()))
            .collect()
    }

    async fn request_topics(&self, question: &str) -> Result<Vec<String>, llm::LlmError> {
        let prompt = format!(
            "Given this predicted question: \"{}\"\n\n\
             Extract and expand into 3-5 key topics or concepts relevant for answering it.\n\n\
             Return a JSON object with a \"topics\" field containing an array of topic \
             strings:\n{{\"topics\": [\"topic1\", \"topic2\", \"topic3\"]}}\n\n\
             Only return the JSON object, no additional text.",
            question
        );

        let system_prompt = "You are an expert at extracting and expanding topics from \
                             questions. Always respond with valid JSON only.";

        let text = self
            .llm
            .complete(system_prompt, &[ChatMessage::user(prompt)], 0.3, 200)
            .await?;

        let payload: TopicsPayload = serde_json::from_value(llm::parse_json_object(&text)?)
            .map_err(|e| {
                llm::LlmError::Provider(format!("Topics payload had wrong shape: {}", e))
            })?;

        let mut topics = payload.topics;
        topics.retain(|topic| !topic.trim().is_empty());
        topics.truncate(MAX_TOPICS);
        Ok(topics)
    }
}

/// Keyword-extraction fallback: lowercase, split on whitespace, drop stop
/// words and short tokens, keep the first five.
fn extract_keywords(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .filter(|word| !STOP_WORDS.contains(word) && word.len() >= MIN_KEYWORD_LEN)
        .take(MAX_TOPICS)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::{EmbeddingError, EmbeddingProvider};
    use crate::index::ChunkMetadata;
    use crate::llm::LlmError;
    use async_trait::async_trait;

    struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn complete(
            &self,
            _system_prompt: &str,
            _messages: &[ChatMessage],
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String, LlmError> {
            Err(LlmError::Unavailable)
        }
    }

    struct CannedModel(String);

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn complete(
            &self,
            _system_prompt: &str,
            _messages: &[ChatMessage],
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String, LlmError> {
            Ok(self.0.clone())
        }
    }

    struct ConstantEmbedder;

    impl EmbeddingProvider for ConstantEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "constant"
        }
    }

    fn empty_index() -> Arc<RwLock<VectorIndex>> {
        Arc::new(RwLock::new(VectorIndex::open(
            Arc::new(ConstantEmbedder),
            0.0,
            None,
        )))
    }

    #[test]
    fn test_extract_keywords_drops_stop_words_and_short_tokens() {
        let keywords = extract_keywords("How does the cache eviction policy work");
        assert_eq!(keywords, vec!["cache", "eviction", "policy", "work"]);
    }

    #[test]
    fn test_extract_keywords_caps_at_five() {
        let keywords =
            extract_keywords("alpha bravo charlie delta echo foxtrot golf hotel india");
        assert_eq!(keywords.len(), 5);
    }

    #[tokio::test]
    async fn test_expand_falls_back_when_model_unavailable() {
        let config = Config::default();
        let expander = TopicExpander::new(Arc::new(FailingModel), empty_index(), config.index);

        let topics = expander
            .expand_topics("How does cache eviction work?")
            .await;
        assert_eq!(topics, vec!["cache", "eviction", "work?"]);
    }

    #[tokio::test]
    async fn test_expand_parses_topics() {
        let config = Config::default();
        let model = CannedModel(
            r#"{"topics": ["cache eviction", "LRU policy", "memory pressure"]}"#.to_string(),
        );
        let expander = TopicExpander::new(Arc::new(model), empty_index(), config.index);

        let topics = expander
            .expand_topics("How does cache eviction work?")
            .await;
        assert_eq!(topics.len(), 3);
        assert_eq!(topics[0], "cache eviction");
    }

    #[tokio::test]
    async fn test_plan_documents_deduplicates_in_order() {
        let config = Config::default();
        let index = empty_index();
        {
            let mut guard = index.write().await;
            guard
                .add(vec![
                    ("one".to_string(), ChunkMetadata::new("doc-a.md", 0)),
                    ("two".to_string(), ChunkMetadata::new("doc-b.md", 0)),
                    ("three".to_string(), ChunkMetadata::new("doc-a.md", 1)),
                ])
                .unwrap();
        }

        let expander = TopicExpander::new(Arc::new(FailingModel), index, config.index);
        let plan = expander
            .plan_documents("anything", &["topic".to_string()])
            .await;
        assert_eq!(plan, vec!["doc-a.md", "doc-b.md"]);
    }

    #[tokio::test]
    async fn test_plan_documents_empty_index_gives_empty_plan() {
        let config = Config::default();
        let expander = TopicExpander::new(Arc::new(FailingModel), empty_index(), config.index);

        let plan = expander.plan_documents("anything", &[]).await;
        assert!(plan.is_empty());
    }
}
