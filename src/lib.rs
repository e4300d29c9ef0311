//! # fundseek
//!
//! A domain-specialized retrieval engine for a catalog of mutual funds.
//!
//! ## Overview
//!
//! fundseek answers free-form natural-language queries ("low-risk SBI tech
//! fund with returns above 12%") with a ranked list of fund records, a
//! transparent score breakdown, and a structured prompt for a downstream
//! LLM advisor. It combines:
//!
//! - Offline indexing of the fund corpus into a BM25 inverted index and an
//!   HNSW dense vector index
//! - Rule-based query understanding that extracts structured constraints
//!   from unconstrained text
//! - Hybrid candidate generation (lexical + approximate nearest neighbor)
//! - Reranking by a weighted fusion of semantic, metadata, and fuzzy scores
//! - RAG prompt construction from the top results
//!
//! ## Architecture
//!
//! - `corpus` - Fund records, the corpus store, and ingestion
//! - `text` - Normalization, tokenization, and fuzzy string similarity
//! - `embedding` - Embedding provider trait and vector helpers
//! - `retrieval` - Sparse (BM25) and dense (HNSW) indices
//! - `query` - Structured constraint extraction from query text
//! - `rank` - Weighted-fusion reranker with score explanations
//! - `engine` - Generations, candidate generation, and search operations
//! - `rag` - Advisor prompt construction
//! - `cli` - Command-line interface

pub mod corpus;
pub mod text;
pub mod embedding;
pub mod retrieval;
pub mod query;
pub mod rank;
pub mod engine;
pub mod rag;
pub mod cli;

// Re-export commonly used types
pub use corpus::{CorpusStore, FundRecord, RiskLevel};
pub use engine::{Engine, SearchConfig, SearchError, SearchRequest};
pub use query::{ParsedQuery, QueryParser};
