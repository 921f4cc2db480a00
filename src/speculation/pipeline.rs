//! The speculation pipeline state machine
//!
//! `Predicting → Expanding → Planning → (gate) → Generating → Caching →
//! Done`, with `Aborted` reachable only on structurally invalid input
//! (empty history). The gate is the central design decision: the extra
//! generation call is paid only when the predictor is confident enough for
//! the answer to be likely useful. Below the gate the run still returns
//! prediction and topic output for live suggestion surfaces.
//!
//! The pipeline never consults the prediction or retrieval caches for its
//! own inputs. Conversation state changes too quickly for a cached
//! prediction to stay valid, so every invocation recomputes from scratch.

use crate::cache::{CacheKind, CacheStore};
use crate::config::{CacheConfig, PredictionConfig};
use crate::error::{PresageError, Result};
use crate::llm::ChatMessage;
use crate::predictor::{IntentPredictor, PredictionOutcome};
use crate::speculation::{AnswerGenerator, SpeculativeAnswer, TopicExpander};
use crate::storage::{Database, PredictionRecord};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Pipeline states, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Predicting,
    Expanding,
    Planning,
    Generating,
    Caching,
    Done,
    Aborted,
}

/// What one pipeline run produced
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    /// Terminal state the run reached
    pub stage: PipelineStage,
    pub prediction: PredictionOutcome,
    pub topics: Vec<String>,
    pub planned_documents: Vec<String>,
    /// Handle to the cached speculative answer, when one was produced
    pub answer_id: Option<String>,
}

/// Orchestrates prediction, expansion, planning, and gated generation
pub struct SpeculationPipeline {
    predictor: IntentPredictor,
    expander: TopicExpander,
    generator: AnswerGenerator,
    cache: Arc<CacheStore>,
    database: Arc<Database>,
    prediction_config: PredictionConfig,
    cache_config: CacheConfig,
}

impl SpeculationPipeline {
    pub fn new(
        predictor: IntentPredictor,
        expander: TopicExpander,
        generator: AnswerGenerator,
        cache: Arc<CacheStore>,
        database: Arc<Database>,
        prediction_config: PredictionConfig,
        cache_config: CacheConfig,
    ) -> Self {
        Self {
            predictor,
            expander,
            generator,
            cache,
            database,
            prediction_config,
            cache_config,
        }
    }

    /// Run the full pipeline for a session.
    ///
    /// The only hard failure is an empty history; every collaborator
    /// failure inside the stages has already been absorbed into a degraded
    /// stage result by the component that owns it.
    pub async fn run(&self, session_id: &str, history: &[ChatMessage]) -> Result<PipelineOutcome> {
        if history.is_empty() {
            tracing::debug!("Speculation aborted for {}: empty history", session_id);
            return Err(PresageError::EmptyHistory);
        }

        tracing::debug!("Speculation entering predicting for {}", session_id);
        let prediction = self.predictor.predict(history).await;

        tracing::debug!(
            "Speculation entering expanding: {:?} ({:.2})",
            prediction.predicted_question,
            prediction.confidence
        );
        let topics = self
            .expander
            .expand_topics(&prediction.predicted_question)
            .await;

        let (planned_documents, answer_id) =
            self.speculate(session_id, &prediction, &topics).await;

        Ok(PipelineOutcome {
            stage: PipelineStage::Done,
            prediction,
            topics,
            planned_documents,
            answer_id,
        })
    }

    /// Planning, the confidence gate, generation, and caching.
    ///
    /// Shared with the live suggestion path, which already holds a
    /// prediction and topics and must not pay for them twice.
    pub async fn speculate(
        &self,
        session_id: &str,
        prediction: &PredictionOutcome,
        topics: &[String],
    ) -> (Vec<String>, Option<String>) {
        tracing::debug!("Speculation entering planning for {}", session_id);
        let planned_documents = self
            .expander
            .plan_documents(&prediction.predicted_question, topics)
            .await;

        if prediction.confidence < self.prediction_config.confidence_threshold {
            tracing::debug!(
                "Speculation gate closed: confidence {:.2} below {:.2}",
                prediction.confidence,
                self.prediction_config.confidence_threshold
            );
            return (planned_documents, None);
        }

        tracing::debug!("Speculation entering generating for {}", session_id);
        let generated = self
            .generator
            .generate(&prediction.predicted_question, topics, &planned_documents)
            .await;

        let Some(answer) = generated.answer else {
            return (planned_documents, None);
        };

        tracing::debug!("Speculation entering caching for {}", session_id);
        let answer_id = mint_answer_id();

        self.cache.set(
            CacheKind::Answer,
            &answer_id,
            &SpeculativeAnswer {
                answer,
                source_question: prediction.predicted_question.clone(),
                context_documents: generated.context_used,
            },
            CacheKind::Answer.ttl_seconds(&self.cache_config),
        );

        let record = PredictionRecord {
            session_id: session_id.to_string(),
            predicted_question: prediction.predicted_question.clone(),
            confidence: prediction.confidence,
            topics: topics.to_vec(),
            planned_documents: planned_documents.clone(),
            answer_id: Some(answer_id.clone()),
            created_at: chrono::Utc::now().timestamp(),
        };
        if let Err(e) = self.database.insert_prediction(&record) {
            tracing::warn!("Failed to persist prediction record: {}", e);
        }

        tracing::info!(
            "Speculative answer {} cached for {} ({:?})",
            answer_id,
            session_id,
            record.predicted_question
        );

        (planned_documents, Some(answer_id))
    }
}

fn mint_answer_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("spec_{}", &uuid[..12])
}
