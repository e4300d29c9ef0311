//! Fund records and the corpus store
//!
//! The corpus is an in-memory mapping from fund identifier to the fund
//! record and its generated natural-language description. Records are
//! created at index-build time and immutable within a build generation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub mod loader;

pub use loader::load_corpus;

/// Errors raised on the offline build path. All are fatal: a failed build
/// leaves the previous generation intact.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed row {line}: {reason}")]
    MalformedRow { line: usize, reason: String },

    #[error("duplicate fund_id: {0}")]
    DuplicateFundId(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDim { expected: usize, actual: usize },

    #[error("vector count {vectors} does not match id mapping size {mapping}")]
    VectorCountMismatch { vectors: usize, mapping: usize },

    #[error("manifest mismatch: {0}")]
    ManifestMismatch(String),

    #[error("embedding provider failed: {0}")]
    Embedding(String),

    #[error("index error: {0}")]
    Index(String),
}

/// Canonical risk tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    /// Lenient parse from upstream data ("Medium", "Moderately High",
    /// "Very High Risk", ...). Returns None for unrecognized text.
    pub fn parse(text: &str) -> Option<Self> {
        let t = text.trim().to_lowercase();
        if t.is_empty() {
            return None;
        }
        if t.contains("moderately high") {
            return Some(RiskLevel::Moderate);
        }
        if t.contains("high") {
            return Some(RiskLevel::High);
        }
        if t.contains("low") {
            return Some(RiskLevel::Low);
        }
        if t.contains("moderate") || t.contains("medium") {
            return Some(RiskLevel::Moderate);
        }
        None
    }

    /// Whether two tiers sit next to each other (Low-Moderate, Moderate-High).
    pub fn adjacent(self, other: RiskLevel) -> bool {
        matches!(
            (self, other),
            (RiskLevel::Low, RiskLevel::Moderate)
                | (RiskLevel::Moderate, RiskLevel::Low)
                | (RiskLevel::Moderate, RiskLevel::High)
                | (RiskLevel::High, RiskLevel::Moderate)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::High => "High",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accept upstream risk spellings ("Medium", "Very High Risk") wherever a
/// record is deserialized, not just on the CSV path.
fn de_risk_level<'de, D>(deserializer: D) -> Result<Option<RiskLevel>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(RiskLevel::parse))
}

/// A single mutual fund record.
///
/// Numeric attributes are either absent or finite; absence is never treated
/// as zero by the scoring code. Returns are percentages, AUM is in ₹ crore,
/// sector allocation weights are fractions in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundRecord {
    pub fund_id: String,
    pub fund_name: String,
    /// Asset management company issuing the fund
    #[serde(default, alias = "amc")]
    pub fund_house: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub sub_category: Option<String>,
    #[serde(default)]
    pub asset_class: String,
    #[serde(default)]
    pub fund_type: String,
    #[serde(default)]
    pub sector: String,
    #[serde(default, deserialize_with = "de_risk_level")]
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub expense_ratio: Option<f32>,
    #[serde(default)]
    pub return_1yr: Option<f32>,
    #[serde(default)]
    pub return_3yr: Option<f32>,
    #[serde(default)]
    pub return_5yr: Option<f32>,
    #[serde(default)]
    pub aum: Option<f32>,
    #[serde(default)]
    pub top_holdings: Vec<String>,
    #[serde(default)]
    pub sector_allocation: Vec<(String, f32)>,
    /// Generated at ingestion; non-empty for every stored record
    #[serde(default)]
    pub description: String,
}

impl FundRecord {
    /// Return for a given horizon in years (1, 3, or 5).
    pub fn return_for(&self, years: u8) -> Option<f32> {
        match years {
            1 => self.return_1yr,
            3 => self.return_3yr,
            5 => self.return_5yr,
            _ => None,
        }
    }

    /// Synthesize the natural-language description indexed for this fund.
    ///
    /// Templated sentences over available metadata; missing fields omit
    /// their sentence entirely rather than rendering a placeholder.
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        let category = self.category.trim();
        match (&self.sub_category, category.is_empty()) {
            (Some(sub), false) => parts.push(format!(
                "{} is a {} {} fund from {}.",
                self.fund_name,
                sub.to_lowercase(),
                category.to_lowercase(),
                self.fund_house
            )),
            (None, false) => parts.push(format!(
                "{} is a {} fund from {}.",
                self.fund_name,
                category.to_lowercase(),
                self.fund_house
            )),
            _ => parts.push(format!(
                "{} is a mutual fund from {}.",
                self.fund_name, self.fund_house
            )),
        }

        if !self.sector.trim().is_empty() {
            parts.push(format!("It focuses on the {} sector.", self.sector));
        }

        if let Some(risk) = self.risk_level {
            parts.push(format!(
                "It carries a {} risk profile.",
                risk.as_str().to_lowercase()
            ));
        }

        let mut returns = Vec::new();
        if let Some(r) = self.return_1yr {
            returns.push(format!("1-year return of {r:.2}%"));
        }
        if let Some(r) = self.return_3yr {
            returns.push(format!("3-year return of {r:.2}%"));
        }
        if let Some(r) = self.return_5yr {
            returns.push(format!("5-year return of {r:.2}%"));
        }
        if !returns.is_empty() {
            parts.push(format!("It has delivered a {}.", returns.join(", ")));
        }

        if let Some(er) = self.expense_ratio {
            parts.push(format!("Its expense ratio is {er:.2}%."));
        }
        if let Some(aum) = self.aum {
            parts.push(format!("The fund manages assets of {aum:.2} crore."));
        }

        if !self.top_holdings.is_empty() {
            let holdings: Vec<&str> = self
                .top_holdings
                .iter()
                .take(3)
                .map(|s| s.as_str())
                .collect();
            parts.push(format!("Top holdings include {}.", holdings.join(", ")));
        }

        if !self.sector_allocation.is_empty() {
            let sectors: Vec<String> = self
                .sector_allocation
                .iter()
                .take(3)
                .map(|(sector, weight)| format!("{} ({:.1}%)", sector, weight * 100.0))
                .collect();
            parts.push(format!("Major sector allocations: {}.", sectors.join(", ")));
        }

        parts.join(" ")
    }

    /// Validate record invariants. `line` names the offending input row.
    pub fn validate(&self, line: usize) -> Result<(), BuildError> {
        if self.fund_id.trim().is_empty() {
            return Err(BuildError::MalformedRow {
                line,
                reason: "missing fund_id".to_string(),
            });
        }
        if self.fund_name.trim().is_empty() {
            return Err(BuildError::MalformedRow {
                line,
                reason: "missing fund_name".to_string(),
            });
        }

        let numeric_checks = [
            ("expense_ratio", self.expense_ratio),
            ("return_1yr", self.return_1yr),
            ("return_3yr", self.return_3yr),
            ("return_5yr", self.return_5yr),
            ("aum", self.aum),
        ];
        for (name, value) in numeric_checks {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(BuildError::MalformedRow {
                        line,
                        reason: format!("{name} is not finite"),
                    });
                }
            }
        }

        for (name, value) in [
            ("return_1yr", self.return_1yr),
            ("return_3yr", self.return_3yr),
            ("return_5yr", self.return_5yr),
        ] {
            if let Some(v) = value {
                if !(-100.0..=1000.0).contains(&v) {
                    return Err(BuildError::MalformedRow {
                        line,
                        reason: format!("{name} {v} outside [-100, 1000]"),
                    });
                }
            }
        }

        for (name, value) in [("expense_ratio", self.expense_ratio), ("aum", self.aum)] {
            if let Some(v) = value {
                if v < 0.0 {
                    return Err(BuildError::MalformedRow {
                        line,
                        reason: format!("{name} is negative"),
                    });
                }
            }
        }

        Ok(())
    }
}

/// In-memory corpus: fund_id -> record, iterated in fund_id order so every
/// downstream traversal is deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusStore {
    funds: BTreeMap<String, FundRecord>,
}

impl CorpusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from validated records, generating descriptions for
    /// records that arrived without one.
    pub fn from_records(records: Vec<FundRecord>) -> Result<Self, BuildError> {
        let mut store = Self::new();
        for (i, mut record) in records.into_iter().enumerate() {
            record.validate(i + 1)?;
            if record.description.trim().is_empty() {
                record.description = record.describe();
            }
            store.insert(record)?;
        }
        Ok(store)
    }

    pub fn insert(&mut self, record: FundRecord) -> Result<(), BuildError> {
        if self.funds.contains_key(&record.fund_id) {
            return Err(BuildError::DuplicateFundId(record.fund_id));
        }
        self.funds.insert(record.fund_id.clone(), record);
        Ok(())
    }

    pub fn get(&self, fund_id: &str) -> Option<&FundRecord> {
        self.funds.get(fund_id)
    }

    pub fn len(&self) -> usize {
        self.funds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funds.is_empty()
    }

    /// Records in ascending fund_id order.
    pub fn iter(&self) -> impl Iterator<Item = &FundRecord> {
        self.funds.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.funds.keys().map(|k| k.as_str())
    }
}
