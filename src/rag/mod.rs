//! Advisor prompt construction
//!
//! Formats the top reranked funds into the fixed advisor prompt consumed by
//! the downstream LLM. The prompt is a pure function of the query and the
//! candidate records.

use crate::corpus::FundRecord;
use serde::{Deserialize, Serialize};

/// Number of fund slots in the advisor prompt.
pub const PROMPT_SLOTS: usize = 3;

const EMPTY_SLOT: &str = "No additional fund data available.";

/// Output of the explain-prompt operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResponse {
    pub prompt: String,
    pub candidates: Vec<FundRecord>,
}

fn fmt_pct(value: Option<f32>) -> String {
    match value {
        Some(v) => format!("{v:.2}%"),
        None => "N/A".to_string(),
    }
}

fn fund_block(slot: usize, record: &FundRecord) -> String {
    let risk = record
        .risk_level
        .map(|r| r.as_str().to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let category = if record.category.trim().is_empty() {
        "N/A"
    } else {
        record.category.as_str()
    };

    format!(
        "FUND {slot}: {name}\n\
         - AMC: {amc}\n\
         - Category: {category}\n\
         - Risk Level: {risk}\n\
         - Returns: 1yr: {r1}, 3yr: {r3}, 5yr: {r5}\n\
         - Expense Ratio: {er}",
        name = record.fund_name,
        amc = record.fund_house,
        r1 = fmt_pct(record.return_1yr),
        r3 = fmt_pct(record.return_3yr),
        r5 = fmt_pct(record.return_5yr),
        er = fmt_pct(record.expense_ratio),
    )
}

/// Build the advisor prompt from the top candidates. Fewer than three
/// candidates leave the remaining slots on the empty-slot template; an
/// empty candidate list still yields a well-formed prompt.
pub fn build_advisor_prompt(query: &str, candidates: &[&FundRecord]) -> String {
    let mut blocks: Vec<String> = Vec::with_capacity(PROMPT_SLOTS);
    for slot in 0..PROMPT_SLOTS {
        match candidates.get(slot) {
            Some(record) => blocks.push(fund_block(slot + 1, record)),
            None => blocks.push(EMPTY_SLOT.to_string()),
        }
    }

    format!(
        "You are a mutual fund advisor. A user asked: \"{query}\".\n\
         Here are top matching funds:\n\
         {blocks}\n\
         Which one is the best match? Explain why in 3 sentences.",
        blocks = blocks.join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::RiskLevel;

    fn record(id: &str, name: &str) -> FundRecord {
        FundRecord {
            fund_id: id.to_string(),
            fund_name: name.to_string(),
            fund_house: "SBI".to_string(),
            category: "Debt".to_string(),
            sub_category: None,
            asset_class: String::new(),
            fund_type: String::new(),
            sector: String::new(),
            risk_level: Some(RiskLevel::Low),
            expense_ratio: Some(0.75),
            return_1yr: Some(7.25),
            return_3yr: None,
            return_5yr: Some(8.0),
            aum: None,
            top_holdings: Vec::new(),
            sector_allocation: Vec::new(),
            description: "desc".to_string(),
        }
    }

    #[test]
    fn test_prompt_full_slots() {
        let a = record("MF001", "SBI Magnum Gilt Fund");
        let b = record("MF002", "SBI Corporate Bond Fund");
        let c = record("MF003", "SBI Overnight Fund");
        let prompt = build_advisor_prompt("low risk sbi debt fund", &[&a, &b, &c]);

        assert!(prompt.starts_with(
            "You are a mutual fund advisor. A user asked: \"low risk sbi debt fund\"."
        ));
        assert!(prompt.contains("FUND 1: SBI Magnum Gilt Fund"));
        assert!(prompt.contains("FUND 2: SBI Corporate Bond Fund"));
        assert!(prompt.contains("FUND 3: SBI Overnight Fund"));
        assert!(prompt.contains("- Risk Level: Low"));
        assert!(prompt.ends_with("Which one is the best match? Explain why in 3 sentences."));
        assert!(!prompt.contains(EMPTY_SLOT));
    }

    #[test]
    fn test_prompt_missing_numerics_render_na() {
        let a = record("MF001", "SBI Magnum Gilt Fund");
        let prompt = build_advisor_prompt("q", &[&a]);
        assert!(prompt.contains("- Returns: 1yr: 7.25%, 3yr: N/A, 5yr: 8.00%"));
        assert!(prompt.contains("- Expense Ratio: 0.75%"));
    }

    #[test]
    fn test_prompt_fills_empty_slots() {
        let a = record("MF001", "SBI Magnum Gilt Fund");
        let prompt = build_advisor_prompt("q", &[&a]);
        assert_eq!(prompt.matches(EMPTY_SLOT).count(), 2);
    }

    #[test]
    fn test_prompt_no_candidates() {
        let prompt = build_advisor_prompt("anything", &[]);
        assert_eq!(prompt.matches(EMPTY_SLOT).count(), 3);
        assert!(prompt.contains("Which one is the best match?"));
    }

    #[test]
    fn test_prompt_is_pure() {
        let a = record("MF001", "SBI Magnum Gilt Fund");
        assert_eq!(
            build_advisor_prompt("q", &[&a]),
            build_advisor_prompt("q", &[&a])
        );
    }
}
