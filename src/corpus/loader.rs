//! Corpus ingestion
//!
//! Loads the upstream tabular corpus (CSV, one row per fund) or a JSON
//! export (array or fund_id-keyed map). Numeric fields parse leniently;
//! rows that violate the record invariants abort the build with a
//! line-level error.

use super::{BuildError, CorpusStore, FundRecord, RiskLevel};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Load a corpus file, dispatching on extension (falling back to JSON).
pub fn load_corpus(path: &Path) -> Result<CorpusStore, BuildError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let records = match extension.as_str() {
        "csv" => from_csv(path)?,
        _ => from_json(path)?,
    };

    tracing::info!("Loaded {} fund records from {:?}", records.len(), path);
    CorpusStore::from_records(records)
}

/// Parse a numeric cell leniently: strips currency symbols, thousands
/// separators, percent signs, and unit suffixes. Empty cells become None;
/// anything else unparseable is a malformed row.
fn parse_numeric(raw: &str, line: usize, field: &str) -> Result<Option<f32>, BuildError> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('₹')
        .replace(',', "")
        .trim_end_matches('%')
        .trim()
        .trim_end_matches("Cr")
        .trim_end_matches("cr")
        .trim()
        .to_string();

    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("na") || cleaned.eq_ignore_ascii_case("n/a") {
        return Ok(None);
    }

    cleaned
        .parse::<f32>()
        .map(Some)
        .map_err(|_| BuildError::MalformedRow {
            line,
            reason: format!("unparseable {field}: {raw:?}"),
        })
}

/// Parse a "Sector:0.32|Sector:0.21" allocation cell. Weights above 1.0 are
/// read as percentages and scaled down to fractions.
fn parse_allocation(raw: &str, line: usize) -> Result<Vec<(String, f32)>, BuildError> {
    let mut allocation = Vec::new();
    for entry in raw.split('|').map(str::trim).filter(|e| !e.is_empty()) {
        let (sector, weight) = entry.rsplit_once(':').ok_or_else(|| BuildError::MalformedRow {
            line,
            reason: format!("unparseable sector_allocation entry: {entry:?}"),
        })?;
        let weight = parse_numeric(weight, line, "sector_allocation")?.ok_or_else(|| {
            BuildError::MalformedRow {
                line,
                reason: format!("empty weight in sector_allocation entry: {entry:?}"),
            }
        })?;
        let weight = if weight > 1.0 { weight / 100.0 } else { weight };
        allocation.push((sector.trim().to_string(), weight));
    }
    Ok(allocation)
}

fn from_csv(path: &Path) -> Result<Vec<FundRecord>, BuildError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let col = |names: &[&str]| -> Option<usize> {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
    };

    let fund_id_idx = col(&["fund_id"]).ok_or_else(|| BuildError::MalformedRow {
        line: 1,
        reason: "corpus CSV must have a fund_id column".to_string(),
    })?;
    let fund_name_idx = col(&["fund_name"]).ok_or_else(|| BuildError::MalformedRow {
        line: 1,
        reason: "corpus CSV must have a fund_name column".to_string(),
    })?;
    let fund_house_idx = col(&["fund_house", "amc"]);
    let category_idx = col(&["category"]);
    let sub_category_idx = col(&["sub_category"]);
    let asset_class_idx = col(&["asset_class"]);
    let fund_type_idx = col(&["fund_type"]);
    let sector_idx = col(&["sector"]);
    let risk_idx = col(&["risk_level", "risk"]);
    let expense_idx = col(&["expense_ratio"]);
    let r1_idx = col(&["return_1yr", "returns_1yr"]);
    let r3_idx = col(&["return_3yr", "returns_3yr"]);
    let r5_idx = col(&["return_5yr", "returns_5yr"]);
    let aum_idx = col(&["aum", "aum_crore"]);
    let holdings_idx = col(&["top_holdings"]);
    let allocation_idx = col(&["sector_allocation"]);

    let mut records = Vec::new();
    for (row_num, result) in reader.records().enumerate() {
        let line = row_num + 2; // header is line 1
        let record = result?;
        let cell = |idx: Option<usize>| -> &str {
            idx.and_then(|i| record.get(i)).unwrap_or("")
        };

        let fund = FundRecord {
            fund_id: cell(Some(fund_id_idx)).to_string(),
            fund_name: cell(Some(fund_name_idx)).to_string(),
            fund_house: cell(fund_house_idx).to_string(),
            category: cell(category_idx).to_string(),
            sub_category: match cell(sub_category_idx) {
                "" => None,
                s => Some(s.to_string()),
            },
            asset_class: cell(asset_class_idx).to_string(),
            fund_type: cell(fund_type_idx).to_string(),
            sector: cell(sector_idx).to_string(),
            risk_level: RiskLevel::parse(cell(risk_idx)),
            expense_ratio: parse_numeric(cell(expense_idx), line, "expense_ratio")?,
            return_1yr: parse_numeric(cell(r1_idx), line, "return_1yr")?,
            return_3yr: parse_numeric(cell(r3_idx), line, "return_3yr")?,
            return_5yr: parse_numeric(cell(r5_idx), line, "return_5yr")?,
            aum: parse_numeric(cell(aum_idx), line, "aum")?,
            top_holdings: cell(holdings_idx)
                .split('|')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect(),
            sector_allocation: parse_allocation(cell(allocation_idx), line)?,
            description: String::new(),
        };

        fund.validate(line)?;
        records.push(fund);
    }

    Ok(records)
}

fn from_json(path: &Path) -> Result<Vec<FundRecord>, BuildError> {
    let raw = fs::read_to_string(path)?;

    // Either a JSON array of records or a {fund_id: record} map.
    if let Ok(records) = serde_json::from_str::<Vec<FundRecord>>(&raw) {
        return Ok(records);
    }

    let map: BTreeMap<String, FundRecord> = serde_json::from_str(&raw)?;
    Ok(map
        .into_iter()
        .map(|(key, mut record)| {
            if record.fund_id.trim().is_empty() {
                record.fund_id = key;
            }
            record
        })
        .collect())
}
