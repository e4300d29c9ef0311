//! Enhanced reranking
//!
//! Combines three normalized subscores per candidate - semantic similarity,
//! metadata constraint match, and fuzzy string match - under an explicit
//! weight vector, and emits a full explanation record for every score.

use crate::corpus::FundRecord;
use crate::query::Constraint;
use crate::text::{strip_name_suffixes, token_set_ratio};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Final-score weights. Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RerankWeights {
    pub semantic: f32,
    pub metadata: f32,
    pub fuzzy: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            metadata: 0.3,
            fuzzy: 0.1,
        }
    }
}

impl RerankWeights {
    pub fn is_valid(&self) -> bool {
        (self.semantic + self.metadata + self.fuzzy - 1.0).abs() < 1e-6
            && self.semantic >= 0.0
            && self.metadata >= 0.0
            && self.fuzzy >= 0.0
    }
}

/// Metadata importance weights per constraint family.
const WEIGHT_AMC: f32 = 2.0;
const WEIGHT_CATEGORY: f32 = 1.5;
const WEIGHT_RISK: f32 = 1.2;
const WEIGHT_SECTOR: f32 = 1.2;
const WEIGHT_RETURNS: f32 = 1.0;
const WEIGHT_EXPENSE: f32 = 0.8;
const WEIGHT_AUM: f32 = 0.8;

/// Direction of a numeric threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Value must meet or exceed the threshold
    Minimum,
    /// Value must not exceed the threshold
    Maximum,
}

/// Soft numeric matching: full credit on the right side of the threshold,
/// proportional credit inside the tolerance band, zero beyond it.
pub fn partial_credit(value: f32, threshold: f32, direction: Direction, band: f32) -> f32 {
    if threshold <= 0.0 {
        return match direction {
            Direction::Minimum => (value >= threshold) as u8 as f32,
            Direction::Maximum => (value <= threshold) as u8 as f32,
        };
    }

    match direction {
        Direction::Minimum => {
            if value >= threshold {
                1.0
            } else if value >= threshold * (1.0 - band) {
                value / threshold
            } else {
                0.0
            }
        }
        Direction::Maximum => {
            if value <= threshold {
                1.0
            } else if value <= threshold * (1.0 + band) {
                threshold / value
            } else {
                0.0
            }
        }
    }
}

/// Where the semantic subscore came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticSource {
    /// Cosine between the query and fund embeddings
    Cosine,
    /// Min-max-normalized BM25 substituted in lexical-only mode
    Bm25Substitute,
    /// No signal available (e.g. empty residual query)
    Unavailable,
}

/// One metadata constraint's contribution to the metadata subscore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataComponent {
    /// Constraint field label ("amc", "min_return_3yr", ...)
    pub constraint: String,
    /// Match indicator in [0, 1]
    pub indicator: f32,
    /// Importance weight as used
    pub weight: f32,
    /// indicator * weight
    pub contribution: f32,
}

/// Stable explanation record for one scored candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreExplanation {
    pub semantic_score: f32,
    pub metadata_score: f32,
    pub fuzzy_score: f32,
    pub semantic_weight: f32,
    pub metadata_weight: f32,
    pub fuzzy_weight: f32,
    pub final_score: f32,
    pub semantic_source: SemanticSource,
    pub metadata_components: Vec<MetadataComponent>,
}

impl ScoreExplanation {
    /// One-sentence prose reason for the match, derived from the strongest
    /// explanation components.
    pub fn matched_reason(&self) -> String {
        let mut reasons: Vec<String> = Vec::new();
        for component in &self.metadata_components {
            if component.indicator < 0.5 {
                continue;
            }
            let name = match component.constraint.as_str() {
                "amc" => "fund house".to_string(),
                "category" => "category".to_string(),
                "risk_level" => "risk profile".to_string(),
                "sector" => "sector focus".to_string(),
                "max_expense_ratio" => "expense ratio".to_string(),
                "min_aum" => "fund size".to_string(),
                other => match other.strip_prefix("min_return_") {
                    Some(period) => format!("{} returns", period.replace("yr", "-year")),
                    None => other.to_string(),
                },
            };
            reasons.push(name);
        }

        if reasons.is_empty() {
            if self.fuzzy_score >= 0.8 {
                return "Matched on a close fund name.".to_string();
            }
            return "Matched on overall description similarity.".to_string();
        }

        match reasons.len() {
            1 => format!("Matched on its {}.", reasons[0]),
            _ => {
                let last = reasons.pop().expect("non-empty");
                format!("Matched on its {} and {}.", reasons.join(", "), last)
            }
        }
    }
}

impl fmt::Display for ScoreExplanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "semantic   {:.4} x {:.1}",
            self.semantic_score, self.semantic_weight
        )?;
        writeln!(
            f,
            "metadata   {:.4} x {:.1}",
            self.metadata_score, self.metadata_weight
        )?;
        for component in &self.metadata_components {
            writeln!(
                f,
                "  {:<20} {:.4} x {:.1} = {:.4}",
                component.constraint, component.indicator, component.weight, component.contribution
            )?;
        }
        writeln!(f, "fuzzy      {:.4} x {:.1}", self.fuzzy_score, self.fuzzy_weight)?;
        write!(f, "final      {:.4}", self.final_score)
    }
}

/// A fully scored candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub fund_id: String,
    pub semantic_score: f32,
    pub metadata_score: f32,
    pub fuzzy_score: f32,
    pub bm25_score: f32,
    pub final_score: f32,
    pub explanation: ScoreExplanation,
}

/// Candidate input to the reranker: the record plus whichever raw signals
/// the generation legs produced.
pub struct CandidateSignals<'a> {
    pub record: &'a FundRecord,
    /// Raw cosine similarity, if the dense leg (or an on-demand dot
    /// product) produced one
    pub cosine: Option<f32>,
    /// Raw BM25 score, if the lexical leg produced one
    pub bm25: Option<f32>,
}

/// Weighted-fusion reranker.
#[derive(Debug, Clone)]
pub struct Reranker {
    weights: RerankWeights,
    band: f32,
}

impl Reranker {
    pub fn new(weights: RerankWeights, partial_credit_band: f32) -> Self {
        Self {
            weights,
            band: partial_credit_band,
        }
    }

    /// Score, sort, and truncate candidates.
    ///
    /// `query_text` is the normalized user query used for fuzzy matching
    /// against fund names and houses; `constraints` are the parsed filters.
    pub fn rerank(
        &self,
        candidates: &[CandidateSignals<'_>],
        query_text: &str,
        constraints: &[Constraint],
        k: usize,
    ) -> Vec<ScoredCandidate> {
        // Min-max bounds for the lexical-only semantic substitution
        let bm25_bounds = candidates
            .iter()
            .filter(|c| c.cosine.is_none())
            .filter_map(|c| c.bm25)
            .fold(None::<(f32, f32)>, |acc, s| match acc {
                None => Some((s, s)),
                Some((lo, hi)) => Some((lo.min(s), hi.max(s))),
            });

        let mut scored: Vec<ScoredCandidate> = candidates
            .iter()
            .map(|candidate| self.score_one(candidate, query_text, constraints, bm25_bounds))
            .collect();

        scored.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    b.metadata_score
                        .partial_cmp(&a.metadata_score)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.fund_id.cmp(&b.fund_id))
        });
        scored.truncate(k);
        scored
    }

    fn score_one(
        &self,
        candidate: &CandidateSignals<'_>,
        query_text: &str,
        constraints: &[Constraint],
        bm25_bounds: Option<(f32, f32)>,
    ) -> ScoredCandidate {
        let record = candidate.record;

        let (semantic, semantic_source) = match candidate.cosine {
            Some(cos) => (cos.clamp(0.0, 1.0), SemanticSource::Cosine),
            None => match (candidate.bm25, bm25_bounds) {
                (Some(score), Some((lo, hi))) if hi > lo => {
                    ((score - lo) / (hi - lo), SemanticSource::Bm25Substitute)
                }
                (Some(_), Some(_)) => (1.0, SemanticSource::Bm25Substitute),
                _ => (0.0, SemanticSource::Unavailable),
            },
        };

        let (metadata, components) = self.metadata_score(record, constraints);
        let fuzzy = self.fuzzy_score(record, query_text);

        let final_score = (self.weights.semantic * semantic
            + self.weights.metadata * metadata
            + self.weights.fuzzy * fuzzy)
            .clamp(0.0, 1.0);

        ScoredCandidate {
            fund_id: record.fund_id.clone(),
            semantic_score: semantic,
            metadata_score: metadata,
            fuzzy_score: fuzzy,
            bm25_score: candidate.bm25.unwrap_or(0.0),
            final_score,
            explanation: ScoreExplanation {
                semantic_score: semantic,
                metadata_score: metadata,
                fuzzy_score: fuzzy,
                semantic_weight: self.weights.semantic,
                metadata_weight: self.weights.metadata,
                fuzzy_weight: self.weights.fuzzy,
                final_score,
                semantic_source,
                metadata_components: components,
            },
        }
    }

    /// Weighted average of per-constraint indicators. Constraints the
    /// record carries no data for are skipped entirely: absence is not a
    /// mismatch. An empty constraint set scores 0 - there is nothing to
    /// reward.
    fn metadata_score(
        &self,
        record: &FundRecord,
        constraints: &[Constraint],
    ) -> (f32, Vec<MetadataComponent>) {
        let mut components = Vec::new();
        let mut total_weight = 0.0;
        let mut total_score = 0.0;

        for constraint in constraints {
            let (indicator, weight) = match constraint {
                Constraint::FundHouse(name) => {
                    if record.fund_house.trim().is_empty() {
                        continue;
                    }
                    let hit = record.fund_house.eq_ignore_ascii_case(name);
                    (hit as u8 as f32, WEIGHT_AMC)
                }
                Constraint::Category(name) => {
                    if record.category.trim().is_empty() {
                        continue;
                    }
                    let hit = record.category.eq_ignore_ascii_case(name);
                    (hit as u8 as f32, WEIGHT_CATEGORY)
                }
                Constraint::Risk(level) => {
                    let Some(record_level) = record.risk_level else {
                        continue;
                    };
                    let indicator = if record_level == *level {
                        1.0
                    } else if record_level.adjacent(*level) {
                        0.5
                    } else {
                        0.0
                    };
                    (indicator, WEIGHT_RISK)
                }
                Constraint::Sector(name) => {
                    if record.sector.trim().is_empty() && record.sector_allocation.is_empty() {
                        continue;
                    }
                    let indicator = if record.sector.eq_ignore_ascii_case(name) {
                        1.0
                    } else if record
                        .sector_allocation
                        .iter()
                        .take(3)
                        .any(|(sector, _)| sector.eq_ignore_ascii_case(name))
                    {
                        0.5
                    } else {
                        0.0
                    };
                    (indicator, WEIGHT_SECTOR)
                }
                Constraint::MinReturn { years, pct } => {
                    let Some(value) = record.return_for(*years) else {
                        continue;
                    };
                    (
                        partial_credit(value, *pct, Direction::Minimum, self.band),
                        WEIGHT_RETURNS,
                    )
                }
                Constraint::MaxExpenseRatio(pct) => {
                    let Some(value) = record.expense_ratio else {
                        continue;
                    };
                    (
                        partial_credit(value, *pct, Direction::Maximum, self.band),
                        WEIGHT_EXPENSE,
                    )
                }
                Constraint::MinAum(crore) => {
                    let Some(value) = record.aum else {
                        continue;
                    };
                    (
                        partial_credit(value, *crore, Direction::Minimum, self.band),
                        WEIGHT_AUM,
                    )
                }
            };

            total_weight += weight;
            total_score += weight * indicator;
            components.push(MetadataComponent {
                constraint: constraint.label(),
                indicator,
                weight,
                contribution: weight * indicator,
            });
        }

        if total_weight > 0.0 {
            ((total_score / total_weight).clamp(0.0, 1.0), components)
        } else {
            (0.0, components)
        }
    }

    /// Best token-set similarity between the query and the fund's name (raw
    /// and suffix-stripped) or house, scaled to [0, 1]. Recovers
    /// misspellings and partial names.
    fn fuzzy_score(&self, record: &FundRecord, query_text: &str) -> f32 {
        if query_text.trim().is_empty() {
            return 0.0;
        }

        let name = crate::text::normalize(&record.fund_name);
        let stripped = strip_name_suffixes(&name);

        let best = token_set_ratio(query_text, &record.fund_name)
            .max(token_set_ratio(query_text, &stripped))
            .max(token_set_ratio(query_text, &record.fund_house));

        (best / 100.0).clamp(0.0, 1.0)
    }
}
