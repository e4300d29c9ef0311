//! Search engine orchestration
//!
//! Owns the generation lifecycle and the online request path: parse the
//! query, apply hard filters, generate candidates from the lexical and
//! dense legs, rerank, and shape results. Requests are served from a
//! single immutable generation snapshot; rebuilds swap the shared handle
//! atomically while in-flight readers finish against the old one.

use crate::corpus::{CorpusStore, FundRecord, RiskLevel};
use crate::embedding::{cosine_similarity, Embedder, Embedding};
use crate::query::{Constraint, ParsedQuery, QueryParser};
use crate::rag::{build_advisor_prompt, PromptResponse, PROMPT_SLOTS};
use crate::rank::{CandidateSignals, Reranker, RerankWeights, ScoreExplanation};
use crate::retrieval::{Bm25Index, DenseConfig, DenseIndex, IndexMetadata, RawHit};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod builder;

pub use builder::{build_generation, load_generation, save_generation};

/// Errors raised on the online search path. Per-request failures never
/// mutate shared state.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid k: {0} (must be in [1, 100])")]
    InvalidK(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("embedding provider failed: {0}")]
    Embedding(String),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("search task failed: {0}")]
    Internal(String),
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// BM25 term-frequency saturation
    pub k1: f32,
    /// BM25 length normalization
    pub b: f32,
    /// Lexical candidate breadth floor
    pub k_bm25: usize,
    /// Dense candidate breadth floor
    pub k_ann: usize,
    /// Final-score weights; must sum to 1.0
    pub weights: RerankWeights,
    /// Relative tolerance for soft numeric matching
    pub partial_credit_band: f32,
    /// Skip the retrieval legs when the filtered pool is at most this large
    pub small_pool_threshold: usize,
    /// Expected embedding dimension; None defers to the manifest
    pub embedding_dim: Option<usize>,
    /// HNSW construction and search parameters
    pub dense: DenseConfig,
    /// Default k when a request does not name one
    pub default_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            k_bm25: 50,
            k_ann: 50,
            weights: RerankWeights::default(),
            partial_credit_band: 0.20,
            small_pool_threshold: 200,
            embedding_dim: None,
            dense: DenseConfig::default(),
            default_k: 5,
        }
    }
}

impl SearchConfig {
    pub fn with_weights(mut self, weights: RerankWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_bm25_params(mut self, k1: f32, b: f32) -> Self {
        self.k1 = k1;
        self.b = b;
        self
    }

    pub fn with_candidate_breadth(mut self, k_bm25: usize, k_ann: usize) -> Self {
        self.k_bm25 = k_bm25;
        self.k_ann = k_ann;
        self
    }

    pub fn with_small_pool_threshold(mut self, threshold: usize) -> Self {
        self.small_pool_threshold = threshold;
        self
    }

    pub fn with_embedding_dim(mut self, dim: Option<usize>) -> Self {
        self.embedding_dim = dim;
        self
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if !self.weights.is_valid() {
            return Err(SearchError::InvalidConfig(
                "score weights must be non-negative and sum to 1.0".to_string(),
            ));
        }
        if self.k1 <= 0.0 {
            return Err(SearchError::InvalidConfig("k1 must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(SearchError::InvalidConfig("b must be in [0, 1]".to_string()));
        }
        if !(0.0..1.0).contains(&self.partial_credit_band) {
            return Err(SearchError::InvalidConfig(
                "partial_credit_band must be in [0, 1)".to_string(),
            ));
        }
        if !(1..=100).contains(&self.default_k) {
            return Err(SearchError::InvalidConfig(
                "default_k must be in [1, 100]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retrieval mode for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchMode {
    /// Lexical and dense legs (the default)
    #[default]
    Hybrid,
    /// BM25 only; the explicit fallback when embeddings are unavailable
    LexicalOnly,
}

/// One search request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub k: usize,
    pub explain: bool,
    pub mode: SearchMode,
    /// Per-call constraint overrides, replacing same-family parsed filters
    pub overrides: Vec<Constraint>,
    pub deadline: Option<Duration>,
}

impl SearchRequest {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            k: SearchConfig::default().default_k,
            explain: false,
            mode: SearchMode::Hybrid,
            overrides: Vec::new(),
            deadline: None,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_overrides(mut self, overrides: Vec<Constraint>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// One returned fund with its score breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub fund_id: String,
    pub fund_name: String,
    pub fund_house: String,
    pub category: String,
    pub sub_category: Option<String>,
    pub risk_level: Option<RiskLevel>,
    pub final_score: f32,
    pub semantic_score: f32,
    pub metadata_score: f32,
    pub fuzzy_score: f32,
    /// One-sentence reason for the match
    pub matched_reason: String,
    /// Full explanation record, present when the request asked for it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<ScoreExplanation>,
}

/// Search output: ranked hits plus the parsed query (constraints, spans,
/// and any warnings) for display layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub parsed: ParsedQuery,
}

/// A complete immutable snapshot of the corpus and its indices.
#[derive(Debug)]
pub struct Generation {
    /// Runtime counter, bumped on every swap
    pub id: u64,
    pub corpus: CorpusStore,
    pub bm25: Bm25Index,
    pub dense: DenseIndex,
    pub metadata: IndexMetadata,
}

/// The retrieval engine. Cheap to share (`Arc<Engine>`); all state behind
/// the generation handle is immutable.
pub struct Engine {
    current: RwLock<Arc<Generation>>,
    embedder: Arc<dyn Embedder>,
    parser: QueryParser,
    reranker: Reranker,
    config: SearchConfig,
}

impl Engine {
    pub fn new(
        generation: Generation,
        embedder: Arc<dyn Embedder>,
        config: SearchConfig,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        if embedder.dimension() != generation.metadata.dimension {
            return Err(SearchError::InvalidConfig(format!(
                "embedder dimension {} does not match index dimension {}",
                embedder.dimension(),
                generation.metadata.dimension
            )));
        }

        Ok(Self {
            current: RwLock::new(Arc::new(generation)),
            embedder,
            parser: QueryParser::new(),
            reranker: Reranker::new(config.weights, config.partial_credit_band),
            config,
        })
    }

    /// Snapshot the current generation. A request takes exactly one
    /// snapshot and serves every sub-lookup from it.
    pub fn generation(&self) -> Arc<Generation> {
        self.current.read().clone()
    }

    /// Atomically replace the served generation. Readers holding the old
    /// snapshot finish against it; it is reclaimed when the last clone
    /// drops.
    pub fn swap(&self, mut generation: Generation) {
        let mut current = self.current.write();
        generation.id = current.id + 1;
        tracing::info!(
            "Swapping generation {} -> {} ({} funds)",
            current.id,
            generation.id,
            generation.corpus.len()
        );
        *current = Arc::new(generation);
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Fund detail lookup: the record plus its generated description.
    pub fn fund(&self, fund_id: &str) -> Option<FundRecord> {
        self.generation().corpus.get(fund_id).cloned()
    }

    /// Execute a search request.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, SearchError> {
        if !(1..=100).contains(&request.k) {
            return Err(SearchError::InvalidK(request.k));
        }

        let generation = self.generation();
        match request.deadline {
            Some(deadline) => tokio::time::timeout(
                deadline,
                self.search_on(generation, request),
            )
            .await
            .map_err(|_| SearchError::DeadlineExceeded(deadline))?,
            None => self.search_on(generation, request).await,
        }
    }

    /// Build the advisor prompt for a query. The candidate records and the
    /// search itself come from the same generation snapshot.
    pub async fn explain_prompt(&self, query: &str) -> Result<PromptResponse, SearchError> {
        let generation = self.generation();
        let request = SearchRequest::new(query).with_k(PROMPT_SLOTS);
        let response = self.search_on(generation.clone(), request).await?;

        let candidates: Vec<FundRecord> = response
            .hits
            .iter()
            .filter_map(|hit| generation.corpus.get(&hit.fund_id).cloned())
            .collect();
        let refs: Vec<&FundRecord> = candidates.iter().collect();

        Ok(PromptResponse {
            prompt: build_advisor_prompt(query, &refs),
            candidates,
        })
    }

    async fn search_on(
        &self,
        generation: Arc<Generation>,
        request: SearchRequest,
    ) -> Result<SearchResponse, SearchError> {
        let mut parsed = self.parser.parse(&request.query);
        parsed.merge_overrides(request.overrides.clone());

        if parsed.is_empty() {
            tracing::debug!("empty query: nothing to search for");
            return Ok(SearchResponse {
                hits: Vec::new(),
                parsed,
            });
        }

        let pool = hard_filter_pool(&generation.corpus, &parsed);
        tracing::debug!(
            "generation {}: pool {} of {} funds, residual {:?}",
            generation.id,
            pool.len(),
            generation.corpus.len(),
            parsed.residual
        );
        if pool.is_empty() {
            return Ok(SearchResponse {
                hits: Vec::new(),
                parsed,
            });
        }

        let query_vec = self.embed_residual(&request, &parsed).await?;
        let signals = self
            .gather_candidates(&generation, &parsed, &pool, query_vec.as_deref(), request.k)
            .await?;

        // Fuzzy matching sees the whole normalized query so that consumed
        // constraint phrases (a fund house, say) still help recover partial
        // names; an all-consumed query has nothing left to recover.
        let fuzzy_text = if parsed.residual.is_empty() {
            String::new()
        } else {
            crate::text::normalize(&request.query)
        };

        let candidate_refs: Vec<CandidateSignals<'_>> = signals
            .iter()
            .filter_map(|(fund_id, cosine, bm25)| {
                generation.corpus.get(fund_id).map(|record| CandidateSignals {
                    record,
                    cosine: *cosine,
                    bm25: *bm25,
                })
            })
            .collect();

        let ranked = self
            .reranker
            .rerank(&candidate_refs, &fuzzy_text, &parsed.constraints, request.k);

        let hits = ranked
            .into_iter()
            .filter_map(|scored| {
                generation.corpus.get(&scored.fund_id).map(|record| SearchHit {
                    fund_id: scored.fund_id.clone(),
                    fund_name: record.fund_name.clone(),
                    fund_house: record.fund_house.clone(),
                    category: record.category.clone(),
                    sub_category: record.sub_category.clone(),
                    risk_level: record.risk_level,
                    final_score: scored.final_score,
                    semantic_score: scored.semantic_score,
                    metadata_score: scored.metadata_score,
                    fuzzy_score: scored.fuzzy_score,
                    matched_reason: scored.explanation.matched_reason(),
                    explanation: request.explain.then_some(scored.explanation),
                })
            })
            .collect();

        Ok(SearchResponse { hits, parsed })
    }

    /// Embed the residual query off the async runtime. Embedding failures
    /// surface as errors; the lexical-only mode is the only fallback.
    async fn embed_residual(
        &self,
        request: &SearchRequest,
        parsed: &ParsedQuery,
    ) -> Result<Option<Embedding>, SearchError> {
        if request.mode == SearchMode::LexicalOnly || parsed.residual.is_empty() {
            return Ok(None);
        }

        let embedder = self.embedder.clone();
        let residual = parsed.residual.clone();
        let embedding = tokio::task::spawn_blocking(move || embedder.embed(&residual))
            .await
            .map_err(|e| SearchError::Internal(e.to_string()))?
            .map_err(|e| SearchError::Embedding(e.to_string()))?;
        Ok(Some(embedding))
    }

    /// Produce `(fund_id, cosine, bm25)` candidate signals according to the
    /// pool size and mode.
    async fn gather_candidates(
        &self,
        generation: &Arc<Generation>,
        parsed: &ParsedQuery,
        pool: &[String],
        query_vec: Option<&[f32]>,
        k: usize,
    ) -> Result<Vec<(String, Option<f32>, Option<f32>)>, SearchError> {
        // Empty residual: the pool is the candidate set, ranked by metadata
        // alone; semantic defaults to 0.
        if parsed.residual.is_empty() {
            return Ok(pool.iter().map(|id| (id.clone(), None, None)).collect());
        }

        // Lexical-only: one BM25 pass over the pool.
        if query_vec.is_none() {
            let k_bm25 = self.config.k_bm25.max(3 * k);
            let pool_set = pool_restriction(generation.as_ref(), pool);
            let hits =
                generation
                    .bm25
                    .search_within(&parsed.residual, pool_set.as_ref(), k_bm25);
            return Ok(hits
                .into_iter()
                .map(|hit| (hit.fund_id, None, Some(hit.score)))
                .collect());
        }
        let query_vec = query_vec.expect("checked above");

        // Small pool: skip the retrieval legs and score every pool member
        // directly against the query embedding.
        if pool.len() <= self.config.small_pool_threshold {
            return Ok(pool
                .iter()
                .map(|id| {
                    let cosine = generation
                        .dense
                        .vector(id)
                        .map(|v| cosine_similarity(query_vec, v));
                    (id.clone(), cosine, None)
                })
                .collect());
        }

        // Full hybrid: fan out the lexical and dense lookups concurrently.
        let k_bm25 = self.config.k_bm25.max(3 * k);
        let k_ann = self.config.k_ann.max(3 * k);
        let pool_set = pool_restriction(generation.as_ref(), pool);

        let bm25_task = {
            let generation = generation.clone();
            let residual = parsed.residual.clone();
            let pool_set = pool_set.clone();
            tokio::task::spawn_blocking(move || {
                generation
                    .bm25
                    .search_within(&residual, pool_set.as_ref(), k_bm25)
            })
        };
        let ann_task = {
            let generation = generation.clone();
            let query_vec = query_vec.to_vec();
            // Oversample when a pool restriction will drop neighbors
            let fetch = if pool_set.is_some() { k_ann * 2 } else { k_ann };
            tokio::task::spawn_blocking(move || generation.dense.search(&query_vec, fetch))
        };

        let (bm25_hits, ann_hits) = tokio::join!(bm25_task, ann_task);
        let bm25_hits: Vec<RawHit> =
            bm25_hits.map_err(|e| SearchError::Internal(e.to_string()))?;
        let mut ann_hits: Vec<RawHit> =
            ann_hits.map_err(|e| SearchError::Internal(e.to_string()))?;

        if let Some(set) = &pool_set {
            ann_hits.retain(|hit| set.contains(&hit.fund_id));
        }
        ann_hits.truncate(k_ann);

        // Union-merge, keeping both raw signals where a fund appears twice.
        let mut merged: HashMap<String, (Option<f32>, Option<f32>)> = HashMap::new();
        for hit in ann_hits {
            merged.entry(hit.fund_id).or_insert((None, None)).0 = Some(hit.score);
        }
        for hit in bm25_hits {
            merged.entry(hit.fund_id).or_insert((None, None)).1 = Some(hit.score);
        }

        // BM25-only candidates still get a real cosine from the stored
        // document vector; the dot product is cheap.
        let mut candidates: Vec<(String, Option<f32>, Option<f32>)> = merged
            .into_iter()
            .map(|(fund_id, (cosine, bm25))| {
                let cosine = cosine.or_else(|| {
                    generation
                        .dense
                        .vector(&fund_id)
                        .map(|v| cosine_similarity(query_vec, v))
                });
                (fund_id, cosine, bm25)
            })
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(candidates)
    }
}

/// Apply the high-precision hard filters (fund house, category, sector) to
/// the corpus, yielding the candidate pool in fund_id order.
fn hard_filter_pool(corpus: &CorpusStore, parsed: &ParsedQuery) -> Vec<String> {
    let house = parsed.fund_house();
    let category = parsed.category();
    let sector = parsed.sector();

    corpus
        .iter()
        .filter(|record| {
            if let Some(house) = house {
                if !record.fund_house.eq_ignore_ascii_case(house) {
                    return false;
                }
            }
            if let Some(category) = category {
                if !record.category.eq_ignore_ascii_case(category) {
                    return false;
                }
            }
            if let Some(sector) = sector {
                // A record naming a different sector is out; a record with
                // no sector field passes only via its top allocations.
                let named = record.sector.trim();
                if !named.is_empty() {
                    if !named.eq_ignore_ascii_case(sector) {
                        return false;
                    }
                } else if !record
                    .sector_allocation
                    .iter()
                    .take(3)
                    .any(|(s, _)| s.eq_ignore_ascii_case(sector))
                {
                    return false;
                }
            }
            true
        })
        .map(|record| record.fund_id.clone())
        .collect()
}

/// The pool only needs materializing as a set when it actually restricts
/// the corpus.
fn pool_restriction(generation: &Generation, pool: &[String]) -> Option<HashSet<String>> {
    if pool.len() == generation.corpus.len() {
        None
    } else {
        Some(pool.iter().cloned().collect())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    fn fund(
        id: &str,
        name: &str,
        house: &str,
        category: &str,
        sector: &str,
        risk: RiskLevel,
        return_3yr: Option<f32>,
        expense: Option<f32>,
    ) -> FundRecord {
        FundRecord {
            fund_id: id.to_string(),
            fund_name: name.to_string(),
            fund_house: house.to_string(),
            category: category.to_string(),
            sub_category: None,
            asset_class: String::new(),
            fund_type: "Open Ended".to_string(),
            sector: sector.to_string(),
            risk_level: Some(risk),
            expense_ratio: expense,
            return_1yr: return_3yr.map(|r| r + 1.0),
            return_3yr,
            return_5yr: None,
            aum: Some(10_000.0),
            top_holdings: Vec::new(),
            sector_allocation: Vec::new(),
            description: String::new(),
        }
    }

    /// A small synthetic corpus covering the end-to-end scenarios.
    pub(crate) fn sample_corpus() -> CorpusStore {
        let records = vec![
            fund(
                "MF001",
                "SBI Magnum Gilt Fund",
                "SBI",
                "Debt",
                "",
                RiskLevel::Low,
                Some(6.5),
                Some(0.8),
            ),
            fund(
                "MF002",
                "SBI Corporate Bond Fund",
                "SBI",
                "Debt",
                "",
                RiskLevel::Moderate,
                Some(7.1),
                Some(0.6),
            ),
            fund(
                "MF003",
                "SBI Credit Risk Fund",
                "SBI",
                "Debt",
                "",
                RiskLevel::High,
                Some(8.4),
                Some(1.5),
            ),
            fund(
                "MF004",
                "SBI Bluechip Fund",
                "SBI",
                "Equity",
                "",
                RiskLevel::Moderate,
                Some(13.2),
                Some(1.1),
            ),
            fund(
                "MF005",
                "ICICI Prudential Technology Fund",
                "ICICI",
                "Equity",
                "Technology",
                RiskLevel::High,
                Some(18.0),
                Some(1.9),
            ),
            fund(
                "MF006",
                "ICICI Prudential Digital Fund",
                "ICICI",
                "Equity",
                "Technology",
                RiskLevel::High,
                Some(13.5),
                Some(1.6),
            ),
            fund(
                "MF007",
                "ICICI Prudential Infotech Value Fund",
                "ICICI",
                "Equity",
                "Technology",
                RiskLevel::High,
                Some(9.0),
                Some(2.1),
            ),
            fund(
                "MF008",
                "HDFC Flexicap Fund",
                "HDFC",
                "Flexi Cap",
                "",
                RiskLevel::Moderate,
                Some(15.3),
                Some(1.0),
            ),
            fund(
                "MF009",
                "Axis Long Term Equity Fund",
                "Axis",
                "ELSS",
                "",
                RiskLevel::High,
                Some(14.1),
                Some(1.3),
            ),
            fund(
                "MF010",
                "HDFC Taxsaver Fund",
                "HDFC",
                "ELSS",
                "",
                RiskLevel::High,
                Some(12.8),
                Some(1.4),
            ),
            fund(
                "MF011",
                "Kotak Balanced Advantage Fund",
                "Kotak",
                "Hybrid",
                "",
                RiskLevel::Moderate,
                Some(10.2),
                Some(0.9),
            ),
            fund(
                "MF012",
                "Nippon India Pharma Fund",
                "Nippon",
                "Equity",
                "Healthcare",
                RiskLevel::High,
                Some(16.7),
                Some(1.8),
            ),
        ];
        CorpusStore::from_records(records).expect("sample corpus is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::sample_corpus;
    use super::*;
    use crate::embedding::{EmbeddingConfig, HashEmbedder};
    use crate::rank::SemanticSource;

    fn engine() -> Engine {
        engine_with_config(SearchConfig::default())
    }

    fn engine_with_config(config: SearchConfig) -> Engine {
        let embedder = Arc::new(HashEmbedder::new(EmbeddingConfig::default(), 256));
        let generation = build_generation(sample_corpus(), embedder.as_ref(), &config)
            .expect("build generation");
        Engine::new(generation, embedder, config).expect("engine")
    }

    #[tokio::test]
    async fn test_low_risk_sbi_debt_scenario() {
        let engine = engine();
        let response = engine
            .search(SearchRequest::new("low risk SBI debt fund").with_k(3))
            .await
            .unwrap();

        assert_eq!(response.hits.len(), 3);
        // Hard filters: every hit is an SBI debt fund
        assert!(response
            .hits
            .iter()
            .all(|h| h.fund_house == "SBI" && h.category == "Debt"));
        // The one low-risk SBI debt fund ranks first with a strong metadata score
        assert_eq!(response.hits[0].fund_id, "MF001");
        assert!(response.hits[0].metadata_score >= 0.8);
    }

    #[tokio::test]
    async fn test_min_return_partial_credit_scenario() {
        let engine = engine();
        let response = engine
            .search(
                SearchRequest::new("ICICI technology fund with 3 year returns above 15%")
                    .with_k(5)
                    .with_explain(true),
            )
            .await
            .unwrap();

        // Pool is the three ICICI technology funds
        assert_eq!(response.hits.len(), 3);
        assert!(response.hits.iter().all(|h| h.fund_house == "ICICI"));

        let component = |fund_id: &str| -> f32 {
            response
                .hits
                .iter()
                .find(|h| h.fund_id == fund_id)
                .and_then(|h| h.explanation.as_ref())
                .and_then(|e| {
                    e.metadata_components
                        .iter()
                        .find(|c| c.constraint == "min_return_3yr")
                })
                .map(|c| c.indicator)
                .expect("return component present")
        };

        // 18.0% meets the threshold outright
        assert_eq!(component("MF005"), 1.0);
        // 13.5% sits in the soft band [12, 15): proportional credit
        assert!((component("MF006") - 13.5 / 15.0).abs() < 1e-6);
        // 9.0% is below the band: zero credit, still present to fill k
        assert_eq!(component("MF007"), 0.0);
    }

    #[tokio::test]
    async fn test_tax_saver_maps_to_elss() {
        let engine = engine();
        let response = engine
            .search(SearchRequest::new("tax saver").with_k(5))
            .await
            .unwrap();

        assert!(!response.hits.is_empty());
        assert!(response.hits.iter().all(|h| h.category == "ELSS"));
    }

    #[tokio::test]
    async fn test_misspelled_name_recovers_via_fuzzy() {
        let engine = engine();
        let response = engine
            .search(SearchRequest::new("hdfc flexcap").with_k(3))
            .await
            .unwrap();

        assert_eq!(response.hits[0].fund_id, "MF008");
        assert!(response.hits[0].fuzzy_score >= 0.85);
        assert!(response.hits[0].metadata_score >= 0.99);
    }

    #[tokio::test]
    async fn test_verbatim_fund_name_ranks_first() {
        let engine = engine();
        let response = engine
            .search(SearchRequest::new("SBI Bluechip Fund").with_k(3))
            .await
            .unwrap();

        assert_eq!(response.hits[0].fund_id, "MF004");
        assert!(response.hits[0].fuzzy_score >= 0.95);
    }

    #[tokio::test]
    async fn test_out_of_range_threshold_dropped_with_warning() {
        let engine = engine();
        let response = engine
            .search(SearchRequest::new("fund with returns over 9999%").with_k(5))
            .await
            .unwrap();

        assert_eq!(response.parsed.warnings.len(), 1);
        assert!(response
            .parsed
            .constraints
            .iter()
            .all(|c| !matches!(c, Constraint::MinReturn { .. })));
        // The residual still drives a normal search
        assert!(!response.hits.is_empty());
    }

    #[tokio::test]
    async fn test_fund_house_alias_filters_every_hit() {
        let engine = engine();
        let response = engine
            .search(SearchRequest::new("SBI funds").with_k(10))
            .await
            .unwrap();

        assert!(!response.hits.is_empty());
        assert!(response.hits.iter().all(|h| h.fund_house == "SBI"));
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty() {
        let engine = engine();
        let response = engine.search(SearchRequest::new("")).await.unwrap();
        assert!(response.hits.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_k_rejected() {
        let engine = engine();
        for k in [0, 101] {
            let err = engine
                .search(SearchRequest::new("sbi fund").with_k(k))
                .await
                .unwrap_err();
            assert!(matches!(err, SearchError::InvalidK(_)));
        }
    }

    #[tokio::test]
    async fn test_results_sorted_and_bounded() {
        let engine = engine();
        let response = engine
            .search(SearchRequest::new("high risk equity fund").with_k(4))
            .await
            .unwrap();

        assert!(response.hits.len() <= 4);
        for window in response.hits.windows(2) {
            assert!(window[0].final_score >= window[1].final_score);
        }
        for hit in &response.hits {
            for score in [
                hit.final_score,
                hit.semantic_score,
                hit.metadata_score,
                hit.fuzzy_score,
            ] {
                assert!((0.0..=1.0).contains(&score));
            }
        }
    }

    #[tokio::test]
    async fn test_determinism_across_runs() {
        let engine = engine();
        let request = SearchRequest::new("low risk SBI debt fund").with_k(5);

        let first = engine.search(request.clone()).await.unwrap();
        let second = engine.search(request).await.unwrap();

        assert_eq!(first.hits.len(), second.hits.len());
        for (a, b) in first.hits.iter().zip(second.hits.iter()) {
            assert_eq!(a.fund_id, b.fund_id);
            assert!((a.final_score - b.final_score).abs() < 1e-6);
            assert!((a.semantic_score - b.semantic_score).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_hybrid_fanout_path() {
        // Force the union path by disabling the small-pool bypass
        let engine = engine_with_config(
            SearchConfig::default().with_small_pool_threshold(0),
        );
        let response = engine
            .search(SearchRequest::new("technology fund").with_k(5).with_explain(true))
            .await
            .unwrap();

        assert!(!response.hits.is_empty());
        // Sector hard filter holds on the fan-out path too
        assert!(response.hits.iter().all(|h| h.fund_house == "ICICI"));
        for hit in &response.hits {
            let explanation = hit.explanation.as_ref().unwrap();
            assert_eq!(explanation.semantic_source, SemanticSource::Cosine);
        }
    }

    #[tokio::test]
    async fn test_lexical_only_mode_marks_substitution() {
        let engine = engine();
        let response = engine
            .search(
                SearchRequest::new("gilt fund")
                    .with_mode(SearchMode::LexicalOnly)
                    .with_explain(true),
            )
            .await
            .unwrap();

        assert!(!response.hits.is_empty());
        for hit in &response.hits {
            let explanation = hit.explanation.as_ref().unwrap();
            assert_eq!(explanation.semantic_source, SemanticSource::Bm25Substitute);
        }
    }

    #[tokio::test]
    async fn test_empty_residual_ranks_by_metadata() {
        let engine = engine();
        // "sbi" is fully consumed by the fund-house extractor
        let response = engine
            .search(SearchRequest::new("sbi").with_k(10))
            .await
            .unwrap();

        assert!(!response.hits.is_empty());
        assert!(response.hits.iter().all(|h| h.fund_house == "SBI"));
        for hit in &response.hits {
            assert_eq!(hit.semantic_score, 0.0);
            assert_eq!(hit.fuzzy_score, 0.0);
        }
    }

    #[tokio::test]
    async fn test_overrides_replace_parsed_constraints() {
        let engine = engine();
        let response = engine
            .search(
                SearchRequest::new("sbi fund")
                    .with_overrides(vec![Constraint::FundHouse("HDFC".to_string())]),
            )
            .await
            .unwrap();

        assert!(!response.hits.is_empty());
        assert!(response.hits.iter().all(|h| h.fund_house == "HDFC"));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let engine = engine();
        let err = engine
            .search(
                SearchRequest::new("low risk sbi debt fund")
                    .with_deadline(Duration::from_nanos(1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::DeadlineExceeded(_)));
    }

    #[tokio::test]
    async fn test_generation_swap_is_atomic_for_readers() {
        let engine = engine();
        let before = engine.generation();
        assert_eq!(before.id, 0);

        // Rebuild from a corpus holding only the first three funds
        let embedder = Arc::new(HashEmbedder::new(EmbeddingConfig::default(), 256));
        let small: Vec<FundRecord> = sample_corpus()
            .iter()
            .take(3)
            .cloned()
            .collect();
        let next = build_generation(
            CorpusStore::from_records(small).unwrap(),
            embedder.as_ref(),
            engine.config(),
        )
        .unwrap();
        engine.swap(next);

        // The old snapshot is untouched; new requests see the new generation
        assert_eq!(before.corpus.len(), 12);
        let after = engine.generation();
        assert_eq!(after.id, 1);
        assert_eq!(after.corpus.len(), 3);

        let response = engine
            .search(SearchRequest::new("sbi fund").with_k(10))
            .await
            .unwrap();
        assert!(response.hits.iter().all(|h| {
            ["MF001", "MF002", "MF003"].contains(&h.fund_id.as_str())
        }));
    }

    #[tokio::test]
    async fn test_explain_prompt_contract() {
        let engine = engine();
        let response = engine.explain_prompt("low risk SBI debt fund").await.unwrap();

        assert!(response.prompt.contains("You are a mutual fund advisor."));
        assert!(response.prompt.contains("low risk SBI debt fund"));
        assert!(response.prompt.contains("FUND 1:"));
        assert_eq!(response.candidates.len(), 3);
        assert!(response.candidates.iter().all(|c| c.fund_house == "SBI"));
    }

    #[tokio::test]
    async fn test_explain_prompt_no_matches_uses_filler() {
        let engine = engine();
        let response = engine.explain_prompt("franklin fund").await.unwrap();
        // No Franklin funds in the corpus: hard filter empties the pool
        assert!(response.candidates.is_empty());
        assert!(response
            .prompt
            .contains("No additional fund data available."));
    }

    #[test]
    fn test_config_validation() {
        assert!(SearchConfig::default().validate().is_ok());

        let bad_weights = SearchConfig::default().with_weights(RerankWeights {
            semantic: 0.9,
            metadata: 0.3,
            fuzzy: 0.1,
        });
        assert!(matches!(
            bad_weights.validate(),
            Err(SearchError::InvalidConfig(_))
        ));

        let bad_b = SearchConfig {
            b: 1.5,
            ..SearchConfig::default()
        };
        assert!(bad_b.validate().is_err());
    }
}
