//! Command-line interface
//!
//! Provides the offline `build` command and the online `search` and
//! `prompt` commands over a built index directory.

use crate::corpus::load_corpus;
use crate::embedding::{create_embedder, Embedder, EmbeddingConfig};
use crate::engine::{
    build_generation, load_generation, save_generation, Engine, SearchConfig, SearchMode,
    SearchRequest,
};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn make_embedder(backend: &str, dimension: usize) -> Result<Arc<dyn Embedder>> {
    // The backend name becomes the manifest's model identity, so an index
    // built with one backend refuses to load under another.
    let config = EmbeddingConfig {
        model_name: backend.to_string(),
        ..Default::default()
    };
    create_embedder(backend, config, dimension)
}

/// Format an AUM value in ₹ crore for display.
fn format_crore(value: Option<f32>) -> String {
    match value {
        Some(v) if v >= 1000.0 => format!("₹{:.2}K Cr", v / 1000.0),
        Some(v) => format!("₹{v:.2} Cr"),
        None => "N/A".to_string(),
    }
}

/// Format a percentage value for display.
fn format_percent(value: Option<f32>) -> String {
    match value {
        Some(v) => format!("{v:.2}%"),
        None => "N/A".to_string(),
    }
}

/// Execute the build command: corpus file in, index directory out.
pub async fn build(corpus: String, output: String, backend: String, dimension: usize) -> Result<()> {
    tracing::info!("Starting index build");
    tracing::info!("  Corpus: {}", corpus);
    tracing::info!("  Output: {}", output);
    tracing::info!("  Backend: {} ({} dims)", backend, dimension);

    let store = load_corpus(Path::new(&corpus))
        .with_context(|| format!("Failed to load corpus from {corpus}"))?;
    let num_funds = store.len();

    let embedder = make_embedder(&backend, dimension)?;
    let config = SearchConfig::default();
    let generation = build_generation(store, embedder.as_ref(), &config)
        .context("Failed to build generation")?;
    save_generation(&generation, Path::new(&output))
        .with_context(|| format!("Failed to save index to {output}"))?;

    println!("\nBuild Summary:");
    println!("  Funds indexed: {num_funds}");
    println!("  Embedding: {} v{}", embedder.model_name(), embedder.model_version());
    println!("  Corpus checksum: {:016x}", generation.metadata.corpus_checksum);
    println!("  Index directory: {output}");

    Ok(())
}

fn load_engine(index: &str, backend: &str, dimension: usize) -> Result<Engine> {
    let embedder = make_embedder(backend, dimension)?;
    let config = SearchConfig::default();
    let generation = load_generation(Path::new(index), embedder.as_ref(), &config)
        .with_context(|| format!("Failed to load index from {index}"))?;
    Engine::new(generation, embedder, config).context("Failed to start engine")
}

/// Execute the search command.
#[allow(clippy::too_many_arguments)]
pub async fn search(
    index: String,
    query: String,
    k: usize,
    explain: bool,
    lexical_only: bool,
    timeout_ms: Option<u64>,
    backend: String,
    dimension: usize,
) -> Result<()> {
    let engine = load_engine(&index, &backend, dimension)?;

    let mut request = SearchRequest::new(&query).with_k(k).with_explain(explain);
    if lexical_only {
        request = request.with_mode(SearchMode::LexicalOnly);
    }
    if let Some(ms) = timeout_ms {
        request = request.with_deadline(Duration::from_millis(ms));
    }

    let response = engine.search(request).await?;

    for warning in &response.parsed.warnings {
        println!("warning: {} ({:?})", warning.message, warning.substring);
    }
    if !response.parsed.constraints.is_empty() {
        let filters: Vec<String> = response
            .parsed
            .spans
            .iter()
            .map(|s| format!("{}={:?}", s.constraint, s.text))
            .collect();
        println!("Filters: {}", filters.join(", "));
    }

    if response.hits.is_empty() {
        println!("No matching funds.");
        return Ok(());
    }

    for (i, hit) in response.hits.iter().enumerate() {
        let record = engine.fund(&hit.fund_id);
        println!(
            "{:>2}. {} [{}]  score {:.4}",
            i + 1,
            hit.fund_name,
            hit.fund_id,
            hit.final_score
        );
        println!(
            "    {} | {} | risk {}",
            hit.fund_house,
            hit.category,
            hit.risk_level.map(|r| r.as_str()).unwrap_or("N/A"),
        );
        if let Some(record) = record {
            println!(
                "    3yr {} | expense {} | AUM {}",
                format_percent(record.return_3yr),
                format_percent(record.expense_ratio),
                format_crore(record.aum),
            );
        }
        println!("    {}", hit.matched_reason);
        if let Some(explanation) = &hit.explanation {
            for line in explanation.to_string().lines() {
                println!("    {line}");
            }
        }
    }

    Ok(())
}

/// Execute the prompt command: print the advisor prompt for a query.
pub async fn prompt(index: String, query: String, backend: String, dimension: usize) -> Result<()> {
    let engine = load_engine(&index, &backend, dimension)?;
    let response = engine.explain_prompt(&query).await?;

    println!("{}", response.prompt);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_crore() {
        assert_eq!(format_crore(Some(27434.33)), "₹27.43K Cr");
        assert_eq!(format_crore(Some(820.5)), "₹820.50 Cr");
        assert_eq!(format_crore(None), "N/A");
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(Some(12.125)), "12.12%");
        assert_eq!(format_percent(None), "N/A");
    }
}
