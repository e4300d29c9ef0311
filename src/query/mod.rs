//! Query understanding
//!
//! Rule-based extraction of structured constraints from free-form query
//! text. Extractors run in a fixed order over the normalized query; each
//! consumes the substrings it recognizes and passes the remainder on. The
//! final remainder is the residual semantic query.
//!
//! Extractor order (stable): fund house, risk level, category, sector,
//! minimum return, maximum expense ratio, minimum AUM, horizon hints.

use crate::corpus::RiskLevel;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A structured filter constraint extracted from the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    /// Asset management company, canonical name
    FundHouse(String),
    /// Fund category, canonical name
    Category(String),
    /// Risk tier
    Risk(RiskLevel),
    /// Sector focus, canonical name
    Sector(String),
    /// Minimum return over a horizon, percent
    MinReturn { years: u8, pct: f32 },
    /// Maximum expense ratio, percent
    MaxExpenseRatio(f32),
    /// Minimum AUM, ₹ crore
    MinAum(f32),
}

impl Constraint {
    /// Stable field label used in explanations and filter maps.
    pub fn label(&self) -> String {
        match self {
            Constraint::FundHouse(_) => "amc".to_string(),
            Constraint::Category(_) => "category".to_string(),
            Constraint::Risk(_) => "risk_level".to_string(),
            Constraint::Sector(_) => "sector".to_string(),
            Constraint::MinReturn { years, .. } => format!("min_return_{years}yr"),
            Constraint::MaxExpenseRatio(_) => "max_expense_ratio".to_string(),
            Constraint::MinAum(_) => "min_aum".to_string(),
        }
    }
}

/// Advisory suitability tag; never a hard filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuitabilityHint {
    LongTerm,
    ShortTerm,
}

/// Which query substring produced which constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedSpan {
    pub constraint: String,
    pub text: String,
}

/// A recognized but rejected constraint (e.g. a return threshold outside
/// the sane range). Parsing continues past warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseWarning {
    pub message: String,
    pub substring: String,
}

/// The parser's output: the residual semantic query plus structured
/// constraints, advisory hints, provenance spans, and warnings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuery {
    pub residual: String,
    pub constraints: Vec<Constraint>,
    pub hints: Vec<SuitabilityHint>,
    pub spans: Vec<MatchedSpan>,
    pub warnings: Vec<ParseWarning>,
}

impl ParsedQuery {
    /// No residual and no constraints: nothing to search for.
    pub fn is_empty(&self) -> bool {
        self.residual.is_empty() && self.constraints.is_empty()
    }

    pub fn fund_house(&self) -> Option<&str> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::FundHouse(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn category(&self) -> Option<&str> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::Category(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn sector(&self) -> Option<&str> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::Sector(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn risk(&self) -> Option<RiskLevel> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::Risk(level) => Some(*level),
            _ => None,
        })
    }

    pub fn max_expense_ratio(&self) -> Option<f32> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::MaxExpenseRatio(v) => Some(*v),
            _ => None,
        })
    }

    pub fn min_aum(&self) -> Option<f32> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::MinAum(v) => Some(*v),
            _ => None,
        })
    }

    /// Merge per-call overrides: an override replaces any parsed constraint
    /// of the same family.
    pub fn merge_overrides(&mut self, overrides: Vec<Constraint>) {
        for over in overrides {
            let label = over.label();
            self.constraints.retain(|c| c.label() != label);
            self.constraints.push(over);
        }
    }

    /// Reconstruct a canonical query string. Parsing the rendered string
    /// yields the same constraints and residual (idempotence).
    pub fn render(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        for constraint in &self.constraints {
            match constraint {
                Constraint::FundHouse(name) => parts.push(name.to_lowercase()),
                Constraint::Risk(level) => {
                    parts.push(format!("{} risk", level.as_str().to_lowercase()))
                }
                Constraint::Category(name) => parts.push(name.to_lowercase()),
                Constraint::Sector(name) => parts.push(name.to_lowercase()),
                Constraint::MinReturn { years, pct } => {
                    parts.push(format!("{years} year returns above {pct}%"))
                }
                Constraint::MaxExpenseRatio(pct) => {
                    parts.push(format!("expense ratio below {pct}%"))
                }
                Constraint::MinAum(crore) => parts.push(format!("aum over {crore} crore")),
            }
        }

        for hint in &self.hints {
            parts.push(
                match hint {
                    SuitabilityHint::LongTerm => "long term",
                    SuitabilityHint::ShortTerm => "short term",
                }
                .to_string(),
            );
        }

        if !self.residual.is_empty() {
            parts.push(self.residual.clone());
        }

        parts.join(" ")
    }
}

type AliasTable = Vec<(Regex, &'static str)>;

fn alias_table(entries: &[(&'static str, &'static str)]) -> AliasTable {
    entries
        .iter()
        .map(|(alias, canonical)| {
            let pattern = format!(r"\b{}\b", regex::escape(alias));
            (Regex::new(&pattern).expect("alias pattern"), *canonical)
        })
        .collect()
}

/// Fund house aliases; multi-word entries listed first so they win over
/// their component words.
static FUND_HOUSES: Lazy<AliasTable> = Lazy::new(|| {
    alias_table(&[
        ("aditya birla", "Aditya Birla"),
        ("icici", "ICICI"),
        ("hdfc", "HDFC"),
        ("sbi", "SBI"),
        ("axis", "Axis"),
        ("kotak", "Kotak"),
        ("nippon", "Nippon"),
        ("tata", "Tata"),
        ("uti", "UTI"),
        ("dsp", "DSP"),
        ("franklin", "Franklin"),
        ("mirae", "Mirae"),
    ])
});

static RISK_ALIASES: Lazy<Vec<(Regex, RiskLevel)>> = Lazy::new(|| {
    let entries: [(&str, RiskLevel); 10] = [
        ("low risk", RiskLevel::Low),
        ("high risk", RiskLevel::High),
        ("moderate risk", RiskLevel::Moderate),
        ("medium risk", RiskLevel::Moderate),
        ("conservative", RiskLevel::Low),
        ("safe", RiskLevel::Low),
        ("aggressive", RiskLevel::High),
        ("balanced", RiskLevel::Moderate),
        ("moderate", RiskLevel::Moderate),
        ("medium", RiskLevel::Moderate),
    ];
    entries
        .iter()
        .map(|(alias, level)| {
            let pattern = format!(r"\b{}\b", regex::escape(alias));
            (Regex::new(&pattern).expect("risk pattern"), *level)
        })
        .collect()
});

static CATEGORIES: Lazy<AliasTable> = Lazy::new(|| {
    alias_table(&[
        // The normalizer expands "elss" into this phrase
        ("tax-saving equity-linked saving scheme", "ELSS"),
        ("tax saving", "ELSS"),
        ("tax saver", "ELSS"),
        ("large cap", "Large Cap"),
        ("large-cap", "Large Cap"),
        ("largecap", "Large Cap"),
        ("mid cap", "Mid Cap"),
        ("mid-cap", "Mid Cap"),
        ("midcap", "Mid Cap"),
        ("small cap", "Small Cap"),
        ("small-cap", "Small Cap"),
        ("smallcap", "Small Cap"),
        ("flexi cap", "Flexi Cap"),
        ("flexi-cap", "Flexi Cap"),
        ("flexicap", "Flexi Cap"),
        ("index", "Index"),
        ("liquid", "Liquid"),
        ("hybrid", "Hybrid"),
        ("debt", "Debt"),
        ("gilt", "Debt"),
        ("bond", "Debt"),
        ("equity", "Equity"),
    ])
});

/// Sector synonyms. Single-word aliases rely on the \b anchors for
/// whole-word matching.
static SECTORS: Lazy<AliasTable> = Lazy::new(|| {
    alias_table(&[
        ("technology", "Technology"),
        ("tech", "Technology"),
        ("it", "Technology"),
        ("digital", "Technology"),
        ("pharmaceutical", "Healthcare"),
        ("pharma", "Healthcare"),
        ("healthcare", "Healthcare"),
        ("financial services", "Financial Services"),
        ("consumer goods", "Consumer Goods"),
        ("banking", "Financial Services"),
        ("bank", "Financial Services"),
        ("financial", "Financial Services"),
        ("finance", "Financial Services"),
        ("energy", "Energy"),
        ("power", "Energy"),
        ("infrastructure", "Infrastructure"),
        ("infra", "Infrastructure"),
        ("automobile", "Automobile"),
        ("auto", "Automobile"),
        ("consumer", "Consumer Goods"),
        ("fmcg", "Consumer Goods"),
        ("commodity", "Commodities"),
        ("commodities", "Commodities"),
        ("gold", "Commodities"),
    ])
});

static MIN_RETURN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:([135])\s*-?\s*(?:years?|yr)\s+)?returns?\s*(?:>|over|above|at\s+least|more\s+than|exceeding)\s*(\d+(?:\.\d+)?)\s*%?",
    )
    .expect("min return pattern")
});

static MAX_EXPENSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"expense\s+ratios?\s*(?:<|less\s+than|below|under)\s*(\d+(?:\.\d+)?)\s*%?")
        .expect("max expense pattern")
});

static MIN_AUM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:aum|assets\s+under\s+management)\s*(?:>|over|above|more\s+than|exceeding)\s*(\d+(?:\.\d+)?)\s*(crores?|lakhs?|billion|million)?",
    )
    .expect("min aum pattern")
});

static HORIZON_ALIASES: Lazy<Vec<(Regex, SuitabilityHint)>> = Lazy::new(|| {
    let entries: [(&str, SuitabilityHint); 5] = [
        ("long term", SuitabilityHint::LongTerm),
        ("long-term", SuitabilityHint::LongTerm),
        ("retirement", SuitabilityHint::LongTerm),
        ("short term", SuitabilityHint::ShortTerm),
        ("short-term", SuitabilityHint::ShortTerm),
    ];
    entries
        .iter()
        .map(|(alias, hint)| {
            let pattern = format!(r"\b{}\b", regex::escape(alias));
            (Regex::new(&pattern).expect("horizon pattern"), *hint)
        })
        .collect()
});

/// Rule-based query parser. Stateless; all dictionaries are compiled once.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryParser;

impl QueryParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a raw query into a ParsedQuery. The input runs through the
    /// shared normalizer first, so parsing is insensitive to case,
    /// punctuation, and known abbreviations.
    pub fn parse(&self, query: &str) -> ParsedQuery {
        let mut working = crate::text::normalize(query);
        let mut parsed = ParsedQuery::default();

        self.extract_fund_house(&mut working, &mut parsed);
        self.extract_risk(&mut working, &mut parsed);
        self.extract_category(&mut working, &mut parsed);
        self.extract_sector(&mut working, &mut parsed);
        self.extract_min_return(&mut working, &mut parsed);
        self.extract_max_expense(&mut working, &mut parsed);
        self.extract_min_aum(&mut working, &mut parsed);
        self.extract_horizon(&mut working, &mut parsed);

        parsed.residual = working.split_whitespace().collect::<Vec<_>>().join(" ");

        for warning in &parsed.warnings {
            tracing::warn!(
                "dropped query constraint ({}): {:?}",
                warning.message,
                warning.substring
            );
        }

        parsed
    }

    fn extract_fund_house(&self, working: &mut String, parsed: &mut ParsedQuery) {
        if let Some((text, canonical)) = consume_first_alias(working, &FUND_HOUSES) {
            parsed.spans.push(MatchedSpan {
                constraint: "amc".to_string(),
                text,
            });
            parsed.constraints.push(Constraint::FundHouse(canonical.to_string()));
        }
    }

    fn extract_risk(&self, working: &mut String, parsed: &mut ParsedQuery) {
        for (pattern, level) in RISK_ALIASES.iter() {
            if let Some(m) = pattern.find(working) {
                parsed.spans.push(MatchedSpan {
                    constraint: "risk_level".to_string(),
                    text: m.as_str().to_string(),
                });
                parsed.constraints.push(Constraint::Risk(*level));
                *working = pattern.replace_all(working, " ").into_owned();
                return;
            }
        }
    }

    fn extract_category(&self, working: &mut String, parsed: &mut ParsedQuery) {
        if let Some((text, canonical)) = consume_first_alias(working, &CATEGORIES) {
            parsed.spans.push(MatchedSpan {
                constraint: "category".to_string(),
                text,
            });
            parsed.constraints.push(Constraint::Category(canonical.to_string()));
        }
    }

    fn extract_sector(&self, working: &mut String, parsed: &mut ParsedQuery) {
        if let Some((text, canonical)) = consume_first_alias(working, &SECTORS) {
            parsed.spans.push(MatchedSpan {
                constraint: "sector".to_string(),
                text,
            });
            parsed.constraints.push(Constraint::Sector(canonical.to_string()));
        }
    }

    fn extract_min_return(&self, working: &mut String, parsed: &mut ParsedQuery) {
        let mut seen_years: Vec<u8> = Vec::new();
        for caps in MIN_RETURN_RE.captures_iter(working) {
            let text = caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
            // Bare "returns above X%" defaults to the 3-year horizon
            let years: u8 = caps
                .get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(3);
            let pct: f32 = match caps.get(2).and_then(|m| m.as_str().parse().ok()) {
                Some(v) => v,
                None => continue,
            };

            if !(0.0..=100.0).contains(&pct) {
                parsed.warnings.push(ParseWarning {
                    message: format!("return threshold {pct}% outside [0, 100]"),
                    substring: text,
                });
                continue;
            }
            if seen_years.contains(&years) {
                continue;
            }
            seen_years.push(years);
            parsed.spans.push(MatchedSpan {
                constraint: format!("min_return_{years}yr"),
                text,
            });
            parsed.constraints.push(Constraint::MinReturn { years, pct });
        }
        *working = MIN_RETURN_RE.replace_all(working, " ").into_owned();
    }

    fn extract_max_expense(&self, working: &mut String, parsed: &mut ParsedQuery) {
        if let Some(caps) = MAX_EXPENSE_RE.captures(working) {
            let text = caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
            if let Some(pct) = caps.get(1).and_then(|m| m.as_str().parse::<f32>().ok()) {
                if (0.0..=100.0).contains(&pct) {
                    parsed.spans.push(MatchedSpan {
                        constraint: "max_expense_ratio".to_string(),
                        text,
                    });
                    parsed.constraints.push(Constraint::MaxExpenseRatio(pct));
                } else {
                    parsed.warnings.push(ParseWarning {
                        message: format!("expense ratio threshold {pct}% outside [0, 100]"),
                        substring: text,
                    });
                }
            }
            *working = MAX_EXPENSE_RE.replace_all(working, " ").into_owned();
        }
    }

    fn extract_min_aum(&self, working: &mut String, parsed: &mut ParsedQuery) {
        if let Some(caps) = MIN_AUM_RE.captures(working) {
            let text = caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
            if let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<f32>().ok()) {
                // Unit from suffix if present, else the value is already in
                // the fund AUM unit (₹ crore)
                let factor = match caps.get(2).map(|m| m.as_str()) {
                    Some("lakh") | Some("lakhs") => 0.01,
                    Some("million") => 0.1,
                    Some("billion") => 100.0,
                    _ => 1.0,
                };
                let crore = value * factor;
                if crore.is_finite() && crore > 0.0 {
                    parsed.spans.push(MatchedSpan {
                        constraint: "min_aum".to_string(),
                        text,
                    });
                    parsed.constraints.push(Constraint::MinAum(crore));
                } else {
                    parsed.warnings.push(ParseWarning {
                        message: format!("AUM threshold {value} is not positive"),
                        substring: text,
                    });
                }
            }
            *working = MIN_AUM_RE.replace_all(working, " ").into_owned();
        }
    }

    fn extract_horizon(&self, working: &mut String, parsed: &mut ParsedQuery) {
        for (pattern, hint) in HORIZON_ALIASES.iter() {
            if pattern.is_match(working) {
                if !parsed.hints.contains(hint) {
                    parsed.hints.push(*hint);
                }
                *working = pattern.replace_all(working, " ").into_owned();
            }
        }
    }
}

/// Find the first alias (in table order) present in the working string,
/// consume every occurrence of it, and return (matched text, canonical).
fn consume_first_alias(
    working: &mut String,
    table: &AliasTable,
) -> Option<(String, &'static str)> {
    for (pattern, canonical) in table.iter() {
        if let Some(m) = pattern.find(working) {
            let text = m.as_str().to_string();
            *working = pattern.replace_all(working, " ").into_owned();
            return Some((text, canonical));
        }
    }
    None
}
