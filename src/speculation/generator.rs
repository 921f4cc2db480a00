//! Speculative answer generation

use crate::config::{LlmConfig, PredictionConfig};
use crate::index::VectorIndex;
use crate::llm::{ChatMessage, LanguageModel, LlmError};
use crate::predictor::truncate_chars;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// At most this many documents feed the answer context
const MAX_CONTEXT_DOCS: usize = 3;

/// Per-document character cap inside the context
const MAX_DOC_CHARS: usize = 1000;

/// Overall context character cap handed to the model
const MAX_CONTEXT_CHARS: usize = 3000;

/// An answer computed before its question was asked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeculativeAnswer {
    pub answer: String,
    pub source_question: String,
    pub context_documents: Vec<String>,
}

/// Result of one generation attempt
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    /// The generated answer, absent on any soft failure
    pub answer: Option<String>,
    /// Document names whose text fed the context
    pub context_used: Vec<String>,
}

impl GenerationOutcome {
    fn empty() -> Self {
        Self {
            answer: None,
            context_used: Vec::new(),
        }
    }
}

/// Generates full answers for predicted questions using retrieved context
pub struct AnswerGenerator {
    llm: Arc<dyn LanguageModel>,
    index: Arc<RwLock<VectorIndex>>,
    llm_config: LlmConfig,
    prediction_config: PredictionConfig,
}

impl AnswerGenerator {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        index: Arc<RwLock<VectorIndex>>,
        llm_config: LlmConfig,
        prediction_config: PredictionConfig,
    ) -> Self {
        Self {
            llm,
            index,
            llm_config,
            prediction_config,
        }
    }

    /// Produce an answer for a predicted question.
    ///
    /// Context comes from the planned documents when any resolve, otherwise
    /// from a direct similarity search on the question. A failing or
    /// unconfigured language model is a soft failure: the outcome carries
    /// no answer and the pipeline proceeds without one.
    pub async fn generate(
        &self,
        question: &str,
        topics: &[String],
        planned_documents: &[String],
    ) -> GenerationOutcome {
        if !self.prediction_config.speculate_enabled {
            return GenerationOutcome::empty();
        }

        let (context, context_used) = self.gather_context(question, planned_documents).await;

        match self.request_answer(question, topics, &context).await {
            Ok(answer) => GenerationOutcome {
                answer: Some(answer),
                context_used,
            },
            Err(LlmError::Unavailable) => {
                tracing::debug!("Generation capability not configured, no answer produced");
                GenerationOutcome {
                    answer: None,
                    context_used,
                }
            }
            Err(e) => {
                tracing::warn!("Speculative generation failed softly: {}", e);
                GenerationOutcome {
                    answer: None,
                    context_used,
                }
            }
        }
    }

    /// Gather context text and the names of the documents it came from
    async fn gather_context(
        &self,
        question: &str,
        planned_documents: &[String],
    ) -> (String, Vec<String>) {
        let index = self.index.read().await;

        let mut context = String::new();
        let mut context_used = Vec::new();

        if !planned_documents.is_empty() {
            let names: HashSet<String> = planned_documents.iter().cloned().collect();
            for chunk in index.get_by_names(&names).into_iter().take(MAX_CONTEXT_DOCS) {
                context.push_str("\n\n");
                context.push_str(truncate_chars(&chunk.text, MAX_DOC_CHARS));
                context_used.push(chunk.metadata.name);
            }
        }

        if context.is_empty() {
            match index.search(question, MAX_CONTEXT_DOCS) {
                Ok(hits) => {
                    for hit in hits {
                        context.push_str("\n\n");
                        context.push_str(truncate_chars(&hit.text, MAX_DOC_CHARS));
                        context_used.push(hit.metadata.name);
                    }
                }
                Err(e) => {
                    tracing::warn!("Context search failed, generating without context: {}", e);
                }
            }
        }

        (context, context_used)
    }

    async fn request_answer(
        &self,
        question: &str,
        topics: &[String],
        context: &str,
    ) -> Result<String, LlmError> {
        let system_prompt = "You are a helpful AI assistant. Generate a comprehensive, \
                             accurate answer to the user's question based on the provided \
                             context. Be concise but thorough. If the context doesn't fully \
                             answer the question, acknowledge that and provide the best \
                             answer possible.";

        let context_block = if context.is_empty() {
            "No specific context available, but provide a general answer.".to_string()
        } else {
            truncate_chars(context, MAX_CONTEXT_CHARS).to_string()
        };

        let topics_line = if topics.is_empty() {
            String::new()
        } else {
            format!("\nRelevant topics: {}\n", topics.join(", "))
        };

        let prompt = format!(
            "Question: {}\n{}\nRelevant Context:\n{}\n\n\
             Generate a comprehensive answer to this question.",
            question, topics_line, context_block
        );

        self.llm
            .complete(
                system_prompt,
                &[ChatMessage::user(prompt)],
                self.llm_config.temperature,
                self.llm_config.max_tokens,
            )
            .await
    }
}
