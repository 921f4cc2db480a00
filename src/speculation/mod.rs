//! Speculative answer precomputation
//!
//! The flow that turns a conversation into a ready-to-serve answer before
//! the question is asked: expand the predicted question into topics, plan
//! which documents to prefetch, and (when the predictor's confidence clears
//! the configured gate) generate and cache a full answer. The matcher is
//! the other end of the bridge: it decides at question-arrival time whether
//! a cached speculative answer satisfies the incoming message.

mod expander;
mod generator;
mod matcher;
mod pipeline;

pub use expander::TopicExpander;
pub use generator::{AnswerGenerator, GenerationOutcome, SpeculativeAnswer};
pub use matcher::{lexical_overlap, AnswerMatcher, PrecomputedHit};
pub use pipeline::{PipelineOutcome, PipelineStage, SpeculationPipeline};
