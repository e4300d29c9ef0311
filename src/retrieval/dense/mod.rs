//! Dense retrieval: HNSW over unit vectors
//!
//! Approximate nearest neighbor search via hnsw_rs under cosine distance.
//! Every stored vector is L2-normalized, so inner product and cosine agree
//! and reported similarities fall in [-1, 1].

use crate::corpus::BuildError;
use crate::embedding::{normalize_embedding, Embedding};
use crate::retrieval::RawHit;
use hnsw_rs::hnsw::Hnsw;
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

/// File names inside an index directory.
const VECTORS_FILE: &str = "vectors.bin";
const MAPPING_FILE: &str = "fund_ids.json";
const GRAPH_BASENAME: &str = "ann_graph";

/// Configuration for the HNSW graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseConfig {
    /// Maximum number of connections per layer
    pub max_connections: usize,
    /// Size of the dynamic candidate list during construction
    pub ef_construction: usize,
    /// Maximum number of layers
    pub max_layers: usize,
    /// Candidate list size during search
    pub ef_search: usize,
}

impl Default for DenseConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            ef_construction: 200,
            max_layers: 16,
            ef_search: 64,
        }
    }
}

/// Dense index: HNSW graph plus the bidirectional row <-> fund_id mapping
/// and the raw vector array it was built from.
pub struct DenseIndex {
    hnsw: Hnsw<'static, f32, DistCosine>,
    config: DenseConfig,
    dim: usize,
    /// Row-major unit vectors, one per fund
    vectors: Vec<Embedding>,
    /// Row -> fund_id
    ids: Vec<String>,
    /// fund_id -> row
    rows: HashMap<String, usize>,
}

impl std::fmt::Debug for DenseIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseIndex")
            .field("config", &self.config)
            .field("dim", &self.dim)
            .field("vectors_len", &self.vectors.len())
            .field("ids", &self.ids)
            .field("rows", &self.rows)
            .finish()
    }
}

impl DenseIndex {
    /// Bulk-build from `(fund_id, embedding)` pairs. Entries are sorted by
    /// fund_id before insertion so row assignment is deterministic.
    pub fn build(
        mut entries: Vec<(String, Embedding)>,
        config: DenseConfig,
    ) -> Result<Self, BuildError> {
        if entries.is_empty() {
            return Err(BuildError::Index("cannot build an empty dense index".to_string()));
        }

        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let dim = entries[0].1.len();

        let hnsw: Hnsw<f32, DistCosine> = Hnsw::new(
            config.max_connections,
            entries.len(),
            config.max_layers,
            config.ef_construction,
            DistCosine,
        );

        let mut index = Self {
            hnsw,
            config,
            dim,
            vectors: Vec::with_capacity(entries.len()),
            ids: Vec::with_capacity(entries.len()),
            rows: HashMap::with_capacity(entries.len()),
        };

        for (fund_id, embedding) in entries {
            index.insert(fund_id, embedding)?;
        }

        tracing::info!(
            "Built dense index: {} vectors, {} dimensions",
            index.ids.len(),
            dim
        );
        Ok(index)
    }

    /// Append one vector. The index normalizes it before insertion, per the
    /// embedding contract.
    pub fn insert(&mut self, fund_id: String, mut embedding: Embedding) -> Result<(), BuildError> {
        if embedding.len() != self.dim {
            return Err(BuildError::EmbeddingDim {
                expected: self.dim,
                actual: embedding.len(),
            });
        }
        if self.rows.contains_key(&fund_id) {
            return Err(BuildError::DuplicateFundId(fund_id));
        }

        normalize_embedding(&mut embedding);

        let row = self.ids.len();
        self.hnsw.insert((embedding.as_slice(), row));
        self.vectors.push(embedding);
        self.rows.insert(fund_id.clone(), row);
        self.ids.push(fund_id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Stored unit vector for a fund, if indexed.
    pub fn vector(&self, fund_id: &str) -> Option<&[f32]> {
        self.rows.get(fund_id).map(|&row| self.vectors[row].as_slice())
    }

    /// Retrieve the k nearest neighbors of a query vector. Similarities are
    /// `1 - cosine_distance`, in [-1, 1].
    pub fn search(&self, query: &[f32], k: usize) -> Vec<RawHit> {
        if query.len() != self.dim || k == 0 {
            return Vec::new();
        }

        let ef = self.config.ef_search.max(k);
        let neighbours = self.hnsw.search(query, k, ef);

        let mut hits: Vec<RawHit> = neighbours
            .into_iter()
            .filter_map(|n| {
                self.ids.get(n.d_id).map(|fund_id| RawHit {
                    fund_id: fund_id.clone(),
                    score: (1.0 - n.distance).clamp(-1.0, 1.0),
                })
            })
            .collect();

        // hnsw returns in distance order already; re-sort for the id tie-break
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.fund_id.cmp(&b.fund_id))
        });
        hits
    }

    /// Persist the index into a directory: the vector array (little-endian
    /// f32, row-major, `{count, dim}` header), the sorted fund_id mapping,
    /// and the library-native graph dump.
    pub fn save(&self, dir: &Path) -> Result<(), BuildError> {
        fs::create_dir_all(dir)?;

        let mut file = fs::File::create(dir.join(VECTORS_FILE))?;
        file.write_all(&(self.ids.len() as u64).to_le_bytes())?;
        file.write_all(&(self.dim as u64).to_le_bytes())?;
        for vector in &self.vectors {
            for value in vector {
                file.write_all(&value.to_le_bytes())?;
            }
        }

        let mapping: BTreeMap<&str, usize> = self
            .rows
            .iter()
            .map(|(id, &row)| (id.as_str(), row))
            .collect();
        fs::write(
            dir.join(MAPPING_FILE),
            serde_json::to_vec_pretty(&mapping)?,
        )?;

        self.hnsw
            .file_dump(dir, GRAPH_BASENAME)
            .map_err(|e| BuildError::Index(format!("graph dump failed: {e}")))?;

        tracing::info!("Dense index saved to {:?}", dir);
        Ok(())
    }

    /// Load an index directory. The graph is rebuilt from the persisted
    /// vector array, so a load is bit-for-bit reproducible regardless of
    /// the dump's library version.
    pub fn load(dir: &Path, config: DenseConfig) -> Result<Self, BuildError> {
        let mut file = fs::File::open(dir.join(VECTORS_FILE))?;
        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        let count = u64::from_le_bytes(header) as usize;
        file.read_exact(&mut header)?;
        let dim = u64::from_le_bytes(header) as usize;

        let mut vectors = Vec::with_capacity(count);
        let mut buf = vec![0u8; dim * 4];
        for _ in 0..count {
            file.read_exact(&mut buf)?;
            let vector: Embedding = buf
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            vectors.push(vector);
        }

        let mapping: BTreeMap<String, usize> =
            serde_json::from_str(&fs::read_to_string(dir.join(MAPPING_FILE))?)?;

        if mapping.len() != count {
            return Err(BuildError::VectorCountMismatch {
                vectors: count,
                mapping: mapping.len(),
            });
        }

        let mut ids = vec![String::new(); count];
        for (fund_id, row) in &mapping {
            if *row >= count {
                return Err(BuildError::Index(format!(
                    "mapping row {row} out of range for {count} vectors"
                )));
            }
            ids[*row] = fund_id.clone();
        }

        let entries: Vec<(String, Embedding)> = ids.into_iter().zip(vectors).collect();
        let index = Self::build(entries, config)?;
        tracing::info!("Loaded dense index: {} vectors", index.len());
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedder, EmbeddingConfig, MockEmbedder};

    fn sample_entries() -> Vec<(String, Embedding)> {
        let embedder = MockEmbedder::new(EmbeddingConfig::default(), 32);
        ["MF001", "MF002", "MF003", "MF004"]
            .iter()
            .map(|id| {
                (
                    id.to_string(),
                    embedder.embed(&format!("fund description {id}")).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_build_and_search_self() {
        let entries = sample_entries();
        let query = entries[1].1.clone();
        let index = DenseIndex::build(entries, DenseConfig::default()).unwrap();

        let hits = index.search(&query, 2);
        assert!(!hits.is_empty());
        // The vector itself is its own nearest neighbor
        assert_eq!(hits[0].fund_id, "MF002");
        assert!(hits[0].score > 0.999);
        assert!(hits.iter().all(|h| (-1.0..=1.0).contains(&h.score)));
    }

    #[test]
    fn test_rejects_dimension_mismatch() {
        let mut index = DenseIndex::build(sample_entries(), DenseConfig::default()).unwrap();
        let err = index.insert("MF999".to_string(), vec![0.5; 16]).unwrap_err();
        assert!(matches!(
            err,
            BuildError::EmbeddingDim { expected: 32, actual: 16 }
        ));
    }

    #[test]
    fn test_rejects_duplicate_id() {
        let mut index = DenseIndex::build(sample_entries(), DenseConfig::default()).unwrap();
        let err = index.insert("MF001".to_string(), vec![0.5; 32]).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateFundId(id) if id == "MF001"));
    }

    #[test]
    fn test_vector_lookup() {
        let index = DenseIndex::build(sample_entries(), DenseConfig::default()).unwrap();
        let vector = index.vector("MF003").unwrap();
        assert_eq!(vector.len(), 32);
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        assert!(index.vector("MF999").is_none());
    }

    #[test]
    fn test_save_load_round_trip() {
        let entries = sample_entries();
        let query = entries[0].1.clone();
        let index = DenseIndex::build(entries, DenseConfig::default()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        index.save(dir.path()).unwrap();

        let loaded = DenseIndex::load(dir.path(), DenseConfig::default()).unwrap();
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.dimension(), 32);

        let before = index.search(&query, 3);
        let after = loaded.search(&query, 3);
        assert_eq!(before[0].fund_id, after[0].fund_id);
        assert!((before[0].score - after[0].score).abs() < 1e-6);
    }

    #[test]
    fn test_load_detects_count_mismatch() {
        let index = DenseIndex::build(sample_entries(), DenseConfig::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        index.save(dir.path()).unwrap();

        // Drop one entry from the mapping file
        let mapping_path = dir.path().join(MAPPING_FILE);
        let mut mapping: BTreeMap<String, usize> =
            serde_json::from_str(&fs::read_to_string(&mapping_path).unwrap()).unwrap();
        mapping.remove("MF004");
        fs::write(&mapping_path, serde_json::to_vec(&mapping).unwrap()).unwrap();

        let err = DenseIndex::load(dir.path(), DenseConfig::default()).unwrap_err();
        assert!(matches!(err, BuildError::VectorCountMismatch { .. }));
    }
}
