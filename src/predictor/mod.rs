//! Intent prediction
//!
//! Ranks candidate next questions for a conversation with confidence
//! scores. The predictor anchors on the assistant's most recent reply when
//! one exists: the interesting predictions are follow-ups to what was just
//! said, not generic continuations of the whole conversation. It never
//! fails; any trouble with the language model degrades to a deterministic
//! low-confidence guess.

mod analyzer;

pub use analyzer::{ContextAnalyzer, ContextDigest};

use crate::config::PredictionConfig;
use crate::llm::{self, ChatMessage, LanguageModel, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Confidence assigned to the fallback guess when the model is unreachable
const FALLBACK_CONFIDENCE: f32 = 0.5;

/// How much of the last message the fallback guess quotes
const FALLBACK_SNIPPET_CHARS: usize = 50;

/// How much of the anchoring assistant reply the prompt quotes
const ANCHOR_SNIPPET_CHARS: usize = 500;

/// A ranked candidate next question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionCandidate {
    pub question: String,
    pub confidence: f32,
}

/// Result of one prediction run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionOutcome {
    /// The highest-confidence candidate's question
    pub predicted_question: String,
    /// The highest-confidence candidate's confidence
    pub confidence: f32,
    /// All candidates, best first
    pub candidates: Vec<PredictionCandidate>,
    /// True when the deterministic fallback produced this outcome
    pub fallback: bool,
}

#[derive(Deserialize)]
struct PredictionsPayload {
    predictions: Vec<PredictionCandidate>,
    #[serde(default)]
    reasoning: String,
}

/// Predicts the user's next question from conversation history
pub struct IntentPredictor {
    llm: Arc<dyn LanguageModel>,
    config: PredictionConfig,
}

impl IntentPredictor {
    pub fn new(llm: Arc<dyn LanguageModel>, config: PredictionConfig) -> Self {
        Self { llm, config }
    }

    /// Predict the next question. Always returns a well-formed outcome.
    pub async fn predict(&self, history: &[ChatMessage]) -> PredictionOutcome {
        let start = history.len().saturating_sub(self.config.max_messages);
        let recent = &history[start..];

        let anchor = recent
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .map(|message| message.content.as_str());

        let prompt = build_prompt(recent, anchor);

        match self.request_predictions(&prompt).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("Intent prediction degraded to fallback: {}", e);
                fallback_outcome(history)
            }
        }
    }

    async fn request_predictions(&self, prompt: &str) -> Result<PredictionOutcome, llm::LlmError> {
        let system_prompt = "You are an expert at predicting user intent and next questions in \
                             technical conversations. Always respond with valid JSON only.";

        let text = self
            .llm
            .complete(system_prompt, &[ChatMessage::user(prompt)], 0.3, 500)
            .await?;

        let payload: PredictionsPayload = serde_json::from_value(llm::parse_json_object(&text)?)
            .map_err(|e| {
                llm::LlmError::Provider(format!("Prediction payload had wrong shape: {}", e))
            })?;

        let mut candidates: Vec<PredictionCandidate> = payload
            .predictions
            .into_iter()
            .map(|candidate| PredictionCandidate {
                confidence: candidate.confidence.clamp(0.0, 1.0),
                question: candidate.question,
            })
            .collect();

        let Some(top) = candidates.first().cloned() else {
            return Err(llm::LlmError::Provider(
                "Model returned no prediction candidates".to_string(),
            ));
        };

        candidates.truncate(3);

        if !payload.reasoning.is_empty() {
            tracing::debug!("Prediction reasoning: {}", payload.reasoning);
        }

        Ok(PredictionOutcome {
            predicted_question: top.question,
            confidence: top.confidence,
            candidates,
            fallback: false,
        })
    }
}

fn build_prompt(recent: &[ChatMessage], anchor: Option<&str>) -> String {
    let transcript: Vec<String> = recent
        .iter()
        .map(|message| {
            format!(
                "{}: {}",
                message.role.as_str().to_uppercase(),
                message.content
            )
        })
        .collect();

    let focus_instruction = match anchor {
        Some(reply) => format!(
            "\n\nIMPORTANT: The assistant just provided this response:\n\"{}\"\n\n\
             Your predictions MUST be plausible follow-ups to that specific response: \
             questions that dig into concepts it mentioned, ask for clarification or \
             examples of it, or go deeper on topics it covered. Do NOT predict questions \
             about unrelated topics or generic continuations of the whole conversation.",
            truncate_chars(reply, ANCHOR_SNIPPET_CHARS)
        ),
        None => String::new(),
    };

    format!(
        "Given the conversation history below, predict the most likely next question \
         the user will ask.\n\nConversation History:\n{}{}\n\n\
         Predict 3 possible next questions ranked by likelihood.\n\n\
         Return a JSON object with this structure:\n\
         {{\n  \"predictions\": [\n    {{\"question\": \"...\", \"confidence\": 0.0}},\n    \
         {{\"question\": \"...\", \"confidence\": 0.0}},\n    \
         {{\"question\": \"...\", \"confidence\": 0.0}}\n  ],\n  \
         \"reasoning\": \"brief explanation\"\n}}\n\n\
         Confidence values are between 0.0 and 1.0. Only return valid JSON, no additional text.",
        transcript.join("\n"),
        focus_instruction
    )
}

fn fallback_outcome(history: &[ChatMessage]) -> PredictionOutcome {
    let last = history
        .last()
        .map(|message| message.content.as_str())
        .unwrap_or("");

    let question = format!(
        "Tell me more about {}...",
        truncate_chars(last, FALLBACK_SNIPPET_CHARS)
    );

    PredictionOutcome {
        predicted_question: question.clone(),
        confidence: FALLBACK_CONFIDENCE,
        candidates: vec![PredictionCandidate {
            question,
            confidence: FALLBACK_CONFIDENCE,
        }],
        fallback: true,
    }
}

pub(crate) fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}
