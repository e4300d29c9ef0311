//! Offline generation build, save, and restore
//!
//! A build takes the validated corpus, embeds every description, and
//! produces the immutable `Generation` the engine serves from. Save emits
//! the persisted artifacts (vector array, ANN graph, BM25 state, fund_id
//! mapping, corpus snapshot) plus a sidecar manifest; load validates the
//! manifest against the injected embedder before serving.

use crate::corpus::{BuildError, CorpusStore, FundRecord};
use crate::embedding::Embedder;
use crate::engine::{Generation, SearchConfig};
use crate::retrieval::{Bm25Index, Bm25Params, DenseIndex, IndexMetadata};
use std::fs;
use std::hash::Hasher;
use std::path::Path;
use twox_hash::XxHash64;

const MANIFEST_FILE: &str = "manifest.json";
const BM25_FILE: &str = "bm25.json";
const FUNDS_FILE: &str = "funds.json";

/// Text the lexical index sees: the description plus the key metadata
/// fields keyword queries tend to name.
fn index_text(record: &FundRecord) -> String {
    let mut text = String::new();
    for field in [
        record.fund_name.as_str(),
        record.fund_house.as_str(),
        record.category.as_str(),
        record.sub_category.as_deref().unwrap_or(""),
        record.sector.as_str(),
        record.description.as_str(),
    ] {
        if !field.trim().is_empty() {
            text.push_str(field);
            text.push(' ');
        }
    }
    text
}

/// Checksum over (fund_id, description) pairs in fund_id order. Ties the
/// manifest to the exact indexed content.
fn corpus_checksum(corpus: &CorpusStore) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    for record in corpus.iter() {
        hasher.write(record.fund_id.as_bytes());
        hasher.write(&[0]);
        hasher.write(record.description.as_bytes());
        hasher.write(&[0]);
    }
    hasher.finish()
}

/// Build a fresh generation from a corpus.
pub fn build_generation(
    corpus: CorpusStore,
    embedder: &dyn Embedder,
    config: &SearchConfig,
) -> Result<Generation, BuildError> {
    if corpus.is_empty() {
        return Err(BuildError::Index("cannot build from an empty corpus".to_string()));
    }
    if let Some(expected) = config.embedding_dim {
        if embedder.dimension() != expected {
            return Err(BuildError::EmbeddingDim {
                expected,
                actual: embedder.dimension(),
            });
        }
    }

    tracing::info!(
        "Building generation: {} funds, embedder {} v{} ({} dims)",
        corpus.len(),
        embedder.model_name(),
        embedder.model_version(),
        embedder.dimension()
    );

    let descriptions: Vec<&str> = corpus.iter().map(|r| r.description.as_str()).collect();
    let embeddings = embedder
        .embed_batch(&descriptions)
        .map_err(|e| BuildError::Embedding(e.to_string()))?;

    for embedding in &embeddings {
        if embedding.len() != embedder.dimension() {
            return Err(BuildError::EmbeddingDim {
                expected: embedder.dimension(),
                actual: embedding.len(),
            });
        }
    }

    let bm25 = Bm25Index::build(
        corpus
            .iter()
            .map(|r| (r.fund_id.clone(), index_text(r))),
        Bm25Params {
            k1: config.k1,
            b: config.b,
        },
    );

    let entries: Vec<(String, Vec<f32>)> = corpus
        .iter()
        .map(|r| r.fund_id.clone())
        .zip(embeddings)
        .collect();
    let dense = DenseIndex::build(entries, config.dense.clone())?;

    let metadata = IndexMetadata {
        model_name: embedder.model_name().to_string(),
        model_version: embedder.model_version().to_string(),
        dimension: embedder.dimension(),
        num_funds: corpus.len(),
        corpus_checksum: corpus_checksum(&corpus),
        built_at: chrono::Utc::now().to_rfc3339(),
    };

    tracing::info!("Generation built: checksum {:016x}", metadata.corpus_checksum);

    Ok(Generation {
        id: 0,
        corpus,
        bm25,
        dense,
        metadata,
    })
}

/// Persist a generation's artifacts into a directory.
pub fn save_generation(generation: &Generation, dir: &Path) -> Result<(), BuildError> {
    fs::create_dir_all(dir)?;

    generation.dense.save(dir)?;
    generation.bm25.save(&dir.join(BM25_FILE))?;
    fs::write(
        dir.join(FUNDS_FILE),
        serde_json::to_vec_pretty(&generation.corpus)?,
    )?;
    fs::write(
        dir.join(MANIFEST_FILE),
        serde_json::to_vec_pretty(&generation.metadata)?,
    )?;

    tracing::info!("Generation saved to {:?}", dir);
    Ok(())
}

/// Restore a generation from a directory, validating the manifest against
/// the injected embedder and the loaded content.
pub fn load_generation(
    dir: &Path,
    embedder: &dyn Embedder,
    config: &SearchConfig,
) -> Result<Generation, BuildError> {
    let metadata: IndexMetadata =
        serde_json::from_str(&fs::read_to_string(dir.join(MANIFEST_FILE))?)?;

    if metadata.model_name != embedder.model_name()
        || metadata.model_version != embedder.model_version()
    {
        return Err(BuildError::ManifestMismatch(format!(
            "index built with {} v{}, embedder is {} v{}",
            metadata.model_name,
            metadata.model_version,
            embedder.model_name(),
            embedder.model_version()
        )));
    }
    if metadata.dimension != embedder.dimension() {
        return Err(BuildError::EmbeddingDim {
            expected: metadata.dimension,
            actual: embedder.dimension(),
        });
    }
    if let Some(expected) = config.embedding_dim {
        if metadata.dimension != expected {
            return Err(BuildError::EmbeddingDim {
                expected,
                actual: metadata.dimension,
            });
        }
    }

    let corpus: CorpusStore = serde_json::from_str(&fs::read_to_string(dir.join(FUNDS_FILE))?)?;
    let checksum = corpus_checksum(&corpus);
    if checksum != metadata.corpus_checksum {
        return Err(BuildError::ManifestMismatch(format!(
            "corpus checksum {:016x} does not match manifest {:016x}",
            checksum, metadata.corpus_checksum
        )));
    }

    let bm25 = Bm25Index::load(&dir.join(BM25_FILE))?;
    let dense = DenseIndex::load(dir, config.dense.clone())?;

    if dense.len() != corpus.len() || corpus.len() != metadata.num_funds {
        return Err(BuildError::VectorCountMismatch {
            vectors: dense.len(),
            mapping: corpus.len(),
        });
    }

    tracing::info!("Generation loaded: {} funds from {:?}", corpus.len(), dir);

    Ok(Generation {
        id: 0,
        corpus,
        bm25,
        dense,
        metadata,
    })
}
