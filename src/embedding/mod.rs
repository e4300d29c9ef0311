//! Embedding provider abstraction
//!
//! The embedding model is an injected capability: the engine only relies on
//! `embed(text)` being deterministic for a given model version and on the
//! dimensionality/normalization contract (unit-norm vectors of a fixed
//! dimension). Two deterministic local backends are provided; production
//! deployments plug in a real model behind the same trait.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An embedding vector.
pub type Embedding = Vec<f32>;

/// Configuration for embedding generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name reported into the index manifest
    pub model_name: String,
    /// Model version reported into the index manifest
    pub model_version: String,
    /// Whether to L2-normalize produced vectors (the indices require it)
    pub normalize: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "token-hash".to_string(),
            model_version: "1".to_string(),
            normalize: true,
        }
    }
}

/// Trait for embedding providers.
pub trait Embedder: Send + Sync {
    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed multiple texts in batch
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>>;

    /// Embedding dimension
    fn dimension(&self) -> usize;

    /// Model identity for the index manifest
    fn model_name(&self) -> &str;

    /// Model version for the index manifest
    fn model_version(&self) -> &str;
}

/// L2-normalize an embedding in place.
pub fn normalize_embedding(embedding: &mut Embedding) {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in embedding.iter_mut() {
            *val /= norm;
        }
    }
}

/// Cosine similarity between two embeddings. Zero-length or mismatched
/// inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// Bag-of-tokens embedder: hashes each normalized token to a coordinate and
/// accumulates term frequency. Captures lexical overlap well enough for the
/// retrieval tests and for offline use without a model file.
pub struct HashEmbedder {
    config: EmbeddingConfig,
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(config: EmbeddingConfig, dimension: usize) -> Self {
        Self { config, dimension }
    }

    fn generate(&self, text: &str) -> Embedding {
        let mut embedding = vec![0.0; self.dimension];
        let tokens = crate::text::tokenize(text);
        if tokens.is_empty() {
            return embedding;
        }

        for token in &tokens {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let idx = (hasher.finish() as usize) % self.dimension;
            embedding[idx] += 1.0;
        }

        let total = tokens.len() as f32;
        for val in embedding.iter_mut() {
            *val /= total;
        }

        if self.config.normalize {
            normalize_embedding(&mut embedding);
        }
        embedding
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.generate(text))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|&t| self.generate(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn model_version(&self) -> &str {
        &self.config.model_version
    }
}

/// Mock embedder for tests: deterministic pseudo-random unit vectors seeded
/// by the text hash, so unrelated texts are near-orthogonal.
pub struct MockEmbedder {
    config: EmbeddingConfig,
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(config: EmbeddingConfig, dimension: usize) -> Self {
        Self { config, dimension }
    }

    fn generate(&self, text: &str) -> Embedding {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish();

        let mut embedding = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            // LCG step
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            let value = ((state / 65536) % 10000) as f32 / 10000.0 - 0.5;
            embedding.push(value);
        }

        if self.config.normalize {
            normalize_embedding(&mut embedding);
        }
        embedding
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.generate(text))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|&t| self.generate(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn model_version(&self) -> &str {
        &self.config.model_version
    }
}

/// Create an embedder by backend name.
pub fn create_embedder(
    backend: &str,
    config: EmbeddingConfig,
    dimension: usize,
) -> Result<Arc<dyn Embedder>> {
    match backend {
        "hash" | "token" => Ok(Arc::new(HashEmbedder::new(config, dimension))),
        "mock" => Ok(Arc::new(MockEmbedder::new(config, dimension))),
        other => anyhow::bail!("unknown embedding backend: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedder_unit_norm() {
        let embedder = HashEmbedder::new(EmbeddingConfig::default(), 128);
        let emb = embedder.embed("SBI Bluechip Fund large cap equity").unwrap();
        assert_eq!(emb.len(), 128);

        let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(EmbeddingConfig::default(), 64);
        let a = embedder.embed("low risk debt fund").unwrap();
        let b = embedder.embed("low risk debt fund").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_embedder_overlap_similarity() {
        let embedder = HashEmbedder::new(EmbeddingConfig::default(), 256);
        let base = embedder.embed("technology sector equity fund").unwrap();
        let close = embedder.embed("technology equity fund").unwrap();
        let far = embedder.embed("government bond gilt scheme").unwrap();

        assert!(cosine_similarity(&base, &close) > cosine_similarity(&base, &far));
    }

    #[test]
    fn test_mock_embedder_distinct_texts() {
        let embedder = MockEmbedder::new(EmbeddingConfig::default(), 64);
        let a = embedder.embed("text one").unwrap();
        let b = embedder.embed("text two").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_normalize_embedding() {
        let mut emb = vec![3.0, 4.0];
        normalize_embedding(&mut emb);
        assert!((emb[0] - 0.6).abs() < 1e-6);
        assert!((emb[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = vec![1.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[0.0, 1.0]) - 0.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }

    #[test]
    fn test_embed_batch() {
        let embedder = HashEmbedder::new(EmbeddingConfig::default(), 32);
        let batch = embedder.embed_batch(&["a fund", "b fund", "c fund"]).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].len(), 32);
    }
}
