//! Text normalization and fuzzy similarity
//!
//! One normalizer shared by indexing, query parsing, and fuzzy matching.
//! Applying the same pipeline to documents at build time and to queries at
//! search time is an invariant the indices depend on.

use once_cell::sync::Lazy;
use std::collections::{BTreeSet, HashMap};
use unicode_normalization::UnicodeNormalization;

/// Fixed abbreviation dictionary, applied token-wise after folding.
static ABBREVIATIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("amc", "asset management company"),
        ("elss", "tax-saving equity-linked saving scheme"),
        ("mf", "mutual fund"),
        ("nav", "net asset value"),
        ("sip", "systematic investment plan"),
        ("yr", "year"),
        ("yrs", "years"),
        ("cr", "crore"),
    ])
});

/// Fund-name suffixes carrying no identity, stripped before fuzzy matching.
const NAME_SUFFIXES: [&str; 6] = ["fund", "plan", "scheme", "direct", "regular", "growth"];

/// Normalize text for indexing and querying.
///
/// Pipeline: Unicode NFKC fold, case-fold to lower, strip punctuation
/// (keeping intra-word hyphens, percent signs adjacent to digits, and the
/// comparison operators the query parser recognizes), collapse whitespace,
/// expand the abbreviation dictionary.
pub fn normalize(text: &str) -> String {
    let folded: String = text.nfkc().collect::<String>().to_lowercase();
    let chars: Vec<char> = folded.chars().collect();

    let mut cleaned = String::with_capacity(folded.len());
    for (i, &c) in chars.iter().enumerate() {
        let keep = if c.is_alphanumeric() || c.is_whitespace() {
            true
        } else if c == '-' {
            // Intra-word hyphen only
            i > 0
                && chars[i - 1].is_alphanumeric()
                && chars.get(i + 1).is_some_and(|n| n.is_alphanumeric())
        } else if c == '%' {
            // Percent glued to a digit on either side
            (i > 0 && chars[i - 1].is_ascii_digit())
                || chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())
        } else {
            // Comparison operators are query syntax, not punctuation
            c == '<' || c == '>'
        };

        if keep {
            cleaned.push(c);
        } else {
            cleaned.push(' ');
        }
    }

    let expanded: Vec<&str> = cleaned
        .split_whitespace()
        .map(|tok| ABBREVIATIONS.get(tok).copied().unwrap_or(tok))
        .collect();

    expanded.join(" ")
}

/// Tokenize text: normalize, then split on whitespace.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .map(|t| t.to_string())
        .collect()
}

/// Strip trailing share-class boilerplate from a normalized fund name
/// ("hdfc flexicap fund" -> "hdfc flexicap").
pub fn strip_name_suffixes(normalized_name: &str) -> String {
    let mut tokens: Vec<&str> = normalized_name.split_whitespace().collect();
    while let Some(last) = tokens.last() {
        if tokens.len() > 1 && NAME_SUFFIXES.contains(last) {
            tokens.pop();
        } else {
            break;
        }
    }
    tokens.join(" ")
}

/// Token-set similarity between two raw strings, in [0, 100].
///
/// Both sides run through the shared normalizer, so this never introduces a
/// second tokenization. The comparison follows the token_set_ratio scheme:
/// split into sorted unique tokens, then take the best pairwise indel ratio
/// among (intersection, intersection + a-only, intersection + b-only).
pub fn token_set_ratio(a: &str, b: &str) -> f32 {
    let set_a: BTreeSet<String> = tokenize(a).into_iter().collect();
    let set_b: BTreeSet<String> = tokenize(b).into_iter().collect();

    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let inter: Vec<&String> = set_a.intersection(&set_b).collect();
    let only_a: Vec<&String> = set_a.difference(&set_b).collect();
    let only_b: Vec<&String> = set_b.difference(&set_a).collect();

    // A shared token with nothing left over on one side is a full subset match.
    if !inter.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 100.0;
    }

    let join = |base: &[&String], extra: &[&String]| -> String {
        base.iter()
            .chain(extra.iter())
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    };

    let sect = join(&inter, &[]);
    let combined_a = join(&inter, &only_a);
    let combined_b = join(&inter, &only_b);

    let r1 = indel_ratio(&sect, &combined_a);
    let r2 = indel_ratio(&sect, &combined_b);
    let r3 = indel_ratio(&combined_a, &combined_b);

    r1.max(r2).max(r3)
}

/// Normalized indel similarity (insert/delete edit distance) in [0, 100].
fn indel_ratio(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let len_sum = a.len() + b.len();
    if len_sum == 0 {
        return 0.0;
    }

    let lcs = longest_common_subsequence(&a, &b);
    let distance = len_sum - 2 * lcs;
    100.0 * (len_sum - distance) as f32 / len_sum as f32
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    // Single-row DP; inputs here are short normalized strings.
    let mut row = vec![0usize; b.len() + 1];
    for &ca in a {
        let mut prev_diag = 0;
        for (j, &cb) in b.iter().enumerate() {
            let tmp = row[j + 1];
            row[j + 1] = if ca == cb {
                prev_diag + 1
            } else {
                row[j + 1].max(row[j])
            };
            prev_diag = tmp;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_basic() {
        assert_eq!(normalize("  SBI  Bluechip   Fund! "), "sbi bluechip fund");
    }

    #[test]
    fn test_normalize_keeps_percent_and_hyphen() {
        assert_eq!(normalize("returns above 12%"), "returns above 12%");
        assert_eq!(normalize("large-cap equity"), "large-cap equity");
        // Dangling punctuation goes away
        assert_eq!(normalize("what % is - that"), "what is that");
    }

    #[test]
    fn test_normalize_keeps_comparison_operators() {
        assert_eq!(normalize("returns > 12%"), "returns > 12%");
        assert_eq!(normalize("expense ratio < 1%"), "expense ratio < 1%");
    }

    #[test]
    fn test_normalize_expands_abbreviations() {
        assert_eq!(
            normalize("best ELSS from this AMC"),
            "best tax-saving equity-linked saving scheme from this asset management company"
        );
        assert_eq!(normalize("aum over 500 cr"), "aum over 500 crore");
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Low-risk, SBI fund."),
            vec!["low-risk", "sbi", "fund"]
        );
    }

    #[test]
    fn test_strip_name_suffixes() {
        assert_eq!(strip_name_suffixes("hdfc flexicap fund"), "hdfc flexicap");
        assert_eq!(
            strip_name_suffixes("axis bluechip fund direct growth"),
            "axis bluechip"
        );
        // Never strip down to nothing
        assert_eq!(strip_name_suffixes("fund"), "fund");
    }

    #[test]
    fn test_token_set_ratio_identical() {
        assert_eq!(token_set_ratio("SBI Bluechip Fund", "sbi bluechip fund"), 100.0);
    }

    #[test]
    fn test_token_set_ratio_subset() {
        // A verbatim fund name inside a longer query is a full match
        assert_eq!(
            token_set_ratio("show me SBI Bluechip Fund please", "SBI Bluechip Fund"),
            100.0
        );
    }

    #[test]
    fn test_token_set_ratio_misspelling() {
        let score = token_set_ratio("hdfc flexcap", "hdfc flexicap");
        assert!(score >= 85.0, "got {score}");
    }

    #[test]
    fn test_token_set_ratio_disjoint() {
        let score = token_set_ratio("gold commodity", "technology fund");
        assert!(score < 50.0, "got {score}");
    }

    #[test]
    fn test_token_set_ratio_empty() {
        assert_eq!(token_set_ratio("", "anything"), 0.0);
    }
}
