//! Retrieval indices
//!
//! Sparse (BM25) and dense (HNSW) candidate retrieval over the fund corpus.
//! Both indices key results by `fund_id` and break score ties by ascending
//! `fund_id` so retrieval is deterministic for a fixed generation.

use serde::{Deserialize, Serialize};

pub mod sparse;
pub mod dense;

pub use dense::{DenseConfig, DenseIndex};
pub use sparse::{Bm25Index, Bm25Params};

/// A raw candidate from one retrieval leg, before reranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawHit {
    pub fund_id: String,
    /// Raw BM25 score or raw cosine similarity, depending on the leg
    pub score: f32,
}

/// Metadata describing a built index generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Embedding model identity
    pub model_name: String,
    /// Embedding model version
    pub model_version: String,
    /// Embedding dimension
    pub dimension: usize,
    /// Number of funds indexed
    pub num_funds: usize,
    /// XxHash64 checksum of the corpus descriptions
    pub corpus_checksum: u64,
    /// Build timestamp (RFC 3339)
    pub built_at: String,
}
