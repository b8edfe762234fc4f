//! Shared tokenizer and lexical match-quality scoring.
//!
//! Both lexical backends and the highlighter split text the same way, so a
//! term that matched in the index is also the term that gets highlighted.

use std::collections::HashSet;

/// Split text into lowercase alphanumeric words, in order, with repeats.
pub fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Query tokenizer: [`words`] with duplicates removed, first occurrence kept.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    words(text)
        .into_iter()
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// How well a document's tokens cover the query terms.
///
/// Each term contributes `1.0` for an exact token match, `0.5` when it only
/// appears inside a longer token (prefix or partial match), `0.0` otherwise.
/// The result is averaged over the terms and lies in `[0, 1]`.
pub fn match_quality(terms: &[String], doc_tokens: &HashSet<String>) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let total: f64 = terms
        .iter()
        .map(|term| {
            if doc_tokens.contains(term) {
                1.0
            } else if doc_tokens.iter().any(|t| t.contains(term.as_str())) {
                0.5
            } else {
                0.0
            }
        })
        .sum();
    total / terms.len() as f64
}

/// Map a raw engine score onto `[0, 1]`.
///
/// [`match_quality`] decides the tier and the raw score relative to the
/// best candidate orders items inside a tier. `quality` moves in steps of
/// `1 / (2 * terms)`, and the raw share never spans a full step, so a
/// higher-quality match always outranks a lower-quality one whatever the
/// engine thinks of its length or term frequency.
pub fn lexical_score(raw: f64, max_raw: f64, quality: f64, terms: usize) -> f64 {
    let relative = if max_raw > f64::EPSILON {
        (raw / max_raw).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let band = 0.25 / terms.max(1) as f64;
    ((quality.clamp(0.0, 1.0) + band * relative) / (1.0 + band)).clamp(0.0, 1.0)
}
