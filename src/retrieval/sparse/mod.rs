//! Sparse retrieval: BM25 inverted index
//!
//! An owned index rather than a search library: the per-term document
//! frequencies, per-document term frequencies, and length statistics are
//! part of the persisted state, and scoring can be restricted to a caller
//! supplied candidate pool.

use crate::corpus::BuildError;
use crate::retrieval::RawHit;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// BM25 tuning parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation
    pub k1: f32,
    /// Document-length normalization
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// One indexed document: a fund's normalized description plus key metadata
/// fields, reduced to term frequencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocEntry {
    fund_id: String,
    tf: HashMap<String, u32>,
    len: u32,
}

/// BM25 inverted index over the fund corpus.
///
/// Documents are held in ascending `fund_id` order; a stable sort on the
/// final scores therefore yields the specified tie-break for free.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Index {
    params: Bm25Params,
    docs: Vec<DocEntry>,
    /// Per-term document frequency
    df: HashMap<String, u32>,
    avgdl: f32,
}

impl Bm25Index {
    /// Build an index from `(fund_id, text)` pairs. The text must already be
    /// the same content the dense index embeds (description + metadata).
    pub fn build<I>(documents: I, params: Bm25Params) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut docs: Vec<DocEntry> = documents
            .into_iter()
            .map(|(fund_id, text)| {
                let tokens = crate::text::tokenize(&text);
                let mut tf: HashMap<String, u32> = HashMap::new();
                for token in &tokens {
                    *tf.entry(token.clone()).or_insert(0) += 1;
                }
                DocEntry {
                    fund_id,
                    len: tokens.len() as u32,
                    tf,
                }
            })
            .collect();
        docs.sort_by(|a, b| a.fund_id.cmp(&b.fund_id));

        let mut df: HashMap<String, u32> = HashMap::new();
        for doc in &docs {
            for term in doc.tf.keys() {
                *df.entry(term.clone()).or_insert(0) += 1;
            }
        }

        let total_len: u64 = docs.iter().map(|d| d.len as u64).sum();
        let avgdl = if docs.is_empty() {
            0.0
        } else {
            total_len as f32 / docs.len() as f32
        };

        tracing::info!(
            "Built BM25 index: {} documents, {} terms, avgdl {:.1}",
            docs.len(),
            df.len(),
            avgdl
        );

        Self {
            params,
            docs,
            df,
            avgdl,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// IDF with the +1 floor, so terms present in every document still
    /// contribute a small positive weight.
    fn idf(&self, term: &str) -> f32 {
        let n = self.docs.len() as f32;
        let df = self.df.get(term).copied().unwrap_or(0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score_doc(&self, doc: &DocEntry, query_terms: &[String]) -> f32 {
        let Bm25Params { k1, b } = self.params;
        let mut score = 0.0;

        for term in query_terms {
            let tf = doc.tf.get(term).copied().unwrap_or(0) as f32;
            if tf == 0.0 {
                continue;
            }
            let len_norm = if self.avgdl > 0.0 {
                doc.len as f32 / self.avgdl
            } else {
                1.0
            };
            let numerator = tf * (k1 + 1.0);
            let denominator = tf + k1 * (1.0 - b + b * len_norm);
            score += self.idf(term) * numerator / denominator;
        }

        score
    }

    /// Search the whole corpus. Empty queries return the empty set.
    pub fn search(&self, query: &str, k: usize) -> Vec<RawHit> {
        self.search_within(query, None, k)
    }

    /// Search restricted to an optional candidate pool of fund_ids.
    pub fn search_within(
        &self,
        query: &str,
        pool: Option<&HashSet<String>>,
        k: usize,
    ) -> Vec<RawHit> {
        let query_terms = crate::text::tokenize(query);
        if query_terms.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut hits: Vec<RawHit> = self
            .docs
            .iter()
            .filter(|doc| pool.map_or(true, |p| p.contains(&doc.fund_id)))
            .filter_map(|doc| {
                let score = self.score_doc(doc, &query_terms);
                (score > 0.0).then(|| RawHit {
                    fund_id: doc.fund_id.clone(),
                    score,
                })
            })
            .collect();

        // Stable sort over fund_id-ordered docs keeps ties in ascending id order
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        hits
    }

    /// Persist the full index state as a single JSON blob.
    pub fn save(&self, path: &Path) -> Result<(), BuildError> {
        let blob = serde_json::to_vec(self)?;
        fs::write(path, blob)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, BuildError> {
        let blob = fs::read_to_string(path)?;
        let index: Self = serde_json::from_str(&blob)?;
        tracing::info!("Loaded BM25 index: {} documents", index.docs.len());
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> Bm25Index {
        Bm25Index::build(
            vec![
                (
                    "MF001".to_string(),
                    "SBI Bluechip Fund is a large cap equity fund from SBI".to_string(),
                ),
                (
                    "MF002".to_string(),
                    "HDFC Technology Fund focuses on the technology sector".to_string(),
                ),
                (
                    "MF003".to_string(),
                    "SBI Magnum Gilt Fund is a low risk debt fund".to_string(),
                ),
            ],
            Bm25Params::default(),
        )
    }

    #[test]
    fn test_build_statistics() {
        let index = sample_index();
        assert_eq!(index.len(), 3);
        assert!(index.avgdl > 0.0);
        // "fund" appears in all three documents
        assert_eq!(index.df.get("fund"), Some(&3));
    }

    #[test]
    fn test_search_ranks_matching_doc_first() {
        let index = sample_index();
        let hits = index.search("technology sector", 3);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].fund_id, "MF002");
    }

    #[test]
    fn test_search_empty_query_returns_empty() {
        let index = sample_index();
        assert!(index.search("", 5).is_empty());
        assert!(index.search("  ,.  ", 5).is_empty());
    }

    #[test]
    fn test_search_unknown_terms_return_empty() {
        let index = sample_index();
        assert!(index.search("cryptocurrency futures", 5).is_empty());
    }

    #[test]
    fn test_search_within_pool() {
        let index = sample_index();
        let pool: HashSet<String> = ["MF001".to_string(), "MF003".to_string()].into();
        let hits = index.search_within("sbi fund", Some(&pool), 5);
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.fund_id != "MF002"));
    }

    #[test]
    fn test_tie_break_ascending_fund_id() {
        let index = Bm25Index::build(
            vec![
                ("MF_B".to_string(), "identical text".to_string()),
                ("MF_A".to_string(), "identical text".to_string()),
            ],
            Bm25Params::default(),
        );
        let hits = index.search("identical", 2);
        assert_eq!(hits.len(), 2);
        assert!((hits[0].score - hits[1].score).abs() < 1e-6);
        assert_eq!(hits[0].fund_id, "MF_A");
        assert_eq!(hits[1].fund_id, "MF_B");
    }

    #[test]
    fn test_truncates_to_k() {
        let index = sample_index();
        let hits = index.search("fund", 2);
        assert!(hits.len() <= 2);
    }

    #[test]
    fn test_save_load_round_trip() {
        let index = sample_index();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bm25.json");

        index.save(&path).unwrap();
        let loaded = Bm25Index::load(&path).unwrap();

        assert_eq!(loaded.len(), index.len());
        let before = index.search("technology", 3);
        let after = loaded.search("technology", 3);
        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].fund_id, after[0].fund_id);
        assert!((before[0].score - after[0].score).abs() < 1e-6);
    }
}
