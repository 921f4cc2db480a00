//! Chat turn handling
//!
//! Every incoming message is logged, then either served from a matching
//! precomputed answer or answered fresh through the retrieval + generation
//! path. Generation failures degrade to a canned reply; only store failures
//! and unknown sessions surface as errors.

use crate::cache::{self, CacheKind, CacheStore};
use crate::config::{CacheConfig, IndexConfig, LlmConfig};
use crate::error::Result;
use crate::index::{SearchHit, VectorIndex};
use crate::llm::{ChatMessage, LanguageModel, LlmError, Role};
use crate::predictor::truncate_chars;
use crate::speculation::AnswerMatcher;
use crate::storage::Database;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// How many trailing messages of history accompany a fresh generation
const HISTORY_WINDOW: usize = 5;

/// How many retrieval hits feed the fresh-generation context
const CONTEXT_HITS: usize = 3;

/// Character cap on the fresh-generation context
const MAX_CONTEXT_CHARS: usize = 2000;

/// One completed chat turn
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub reply: String,
    /// True when the reply was served from a precomputed answer
    pub precomputed: bool,
    /// The precomputed answer's identifier, on a hit
    pub answer_id: Option<String>,
}

/// Handles chat turns against the session store, index, and language model
pub struct ChatService {
    llm: Arc<dyn LanguageModel>,
    index: Arc<RwLock<VectorIndex>>,
    matcher: AnswerMatcher,
    cache: Arc<CacheStore>,
    database: Arc<Database>,
    llm_config: LlmConfig,
    index_config: IndexConfig,
    cache_config: CacheConfig,
}

impl ChatService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        index: Arc<RwLock<VectorIndex>>,
        matcher: AnswerMatcher,
        cache: Arc<CacheStore>,
        database: Arc<Database>,
        llm_config: LlmConfig,
        index_config: IndexConfig,
        cache_config: CacheConfig,
    ) -> Self {
        Self {
            llm,
            index,
            matcher,
            cache,
            database,
            llm_config,
            index_config,
            cache_config,
        }
    }

    /// Handle one user message and produce the assistant's reply
    pub async fn respond(&self, session_id: &str, message: &str) -> Result<ChatReply> {
        self.database
            .append_message(session_id, Role::User, message)?;

        // Precomputed path: serve the speculative answer verbatim on a match
        if let Some(hit) = self.matcher.match_answer(session_id, message) {
            self.database
                .append_message(session_id, Role::Assistant, &hit.answer.answer)?;

            return Ok(ChatReply {
                reply: hit.answer.answer,
                precomputed: true,
                answer_id: Some(hit.answer_id),
            });
        }

        let reply = self.generate_fresh(session_id, message).await?;
        self.database
            .append_message(session_id, Role::Assistant, &reply)?;

        Ok(ChatReply {
            reply,
            precomputed: false,
            answer_id: None,
        })
    }

    /// Retrieval query surface, cached under the retrieval kind
    pub async fn query(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let key = cache::query_hash(query);
        if let Some(hits) = self.cache.get::<Vec<SearchHit>>(CacheKind::Retrieval, &key) {
            return Ok(hits);
        }

        let hits = self.index.read().await.search(query, k)?;

        self.cache.set(
            CacheKind::Retrieval,
            &key,
            &hits,
            CacheKind::Retrieval.ttl_seconds(&self.cache_config),
        );

        Ok(hits)
    }

    async fn generate_fresh(&self, session_id: &str, message: &str) -> Result<String> {
        let context = self.gather_context(message).await;

        let history = self.database.get_messages(session_id)?;
        let start = history.len().saturating_sub(HISTORY_WINDOW);
        let mut messages: Vec<ChatMessage> = history[start..]
            .iter()
            .filter_map(|stored| {
                let role = match stored.role.as_str() {
                    "user" => Role::User,
                    "assistant" => Role::Assistant,
                    _ => return None,
                };
                Some(ChatMessage {
                    role,
                    content: stored.content.clone(),
                })
            })
            .collect();

        let context_block = if context.is_empty() {
            "No specific context available.".to_string()
        } else {
            context
        };

        messages.push(ChatMessage::user(format!(
            "Context:\n{}\n\nUser Question: {}\n\nProvide a comprehensive answer.",
            context_block, message
        )));

        let system_prompt = "You are a helpful AI assistant. Answer questions based on the \
                             provided context. If the context doesn't fully answer the \
                             question, use your knowledge to provide a helpful response.";

        match self
            .llm
            .complete(
                system_prompt,
                &messages,
                self.llm_config.temperature,
                self.llm_config.max_tokens,
            )
            .await
        {
            Ok(answer) => Ok(answer),
            Err(LlmError::Unavailable) => {
                tracing::debug!("Generation unavailable, serving placeholder reply");
                Ok(format!(
                    "I understand you're asking: {}. No language model is configured, so I \
                     can't generate a full answer. Set the API key and enable the llm \
                     section to turn on generation.",
                    message
                ))
            }
            Err(e) => {
                tracing::warn!("Fresh generation failed, serving degraded reply: {}", e);
                Ok("I couldn't reach the language model to answer that just now. Please \
                    try again in a moment."
                    .to_string())
            }
        }
    }

    async fn gather_context(&self, message: &str) -> String {
        let hits = {
            let index = self.index.read().await;
            match index.search(message, self.index_config.top_k) {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!("Context retrieval failed, answering without it: {}", e);
                    return String::new();
                }
            }
        };

        let joined = hits
            .iter()
            .take(CONTEXT_HITS)
            .map(|hit| hit.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        truncate_chars(&joined, MAX_CONTEXT_CHARS).to_string()
    }
}
