//! Text embedding
//!
//! A single process-wide `EmbeddingProvider` is constructed at startup and
//! handed by reference to every consumer (the vector index owns one); there
//! is no ambient global. The trait keeps the index testable with a
//! deterministic in-memory provider.
mod provider;

pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
