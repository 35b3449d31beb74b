// src/memory/scoring.rs
//! Relevance scoring shared by both memory backends
//!
//! Tokens are maximal runs of alphanumeric characters, lowercased.
//!
//! ```text
//! score = |distinct query tokens found in the record| / |distinct query tokens|
//!       + 1.0 if the whole lowercased query is a substring of the lowercased value
//! ```
//!
//! A record's tokens come from its value and every string metadata value.
//! Records scoring 0 are not returned.

use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

/// Lowercased alphanumeric tokens of `text`
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

/// Token set of a record: value plus string metadata values
pub fn record_tokens(value: &str, metadata: &Map<String, Value>) -> HashSet<String> {
    let mut tokens: HashSet<String> = tokenize(value).collect();
    for field in metadata.values() {
        if let Value::String(s) = field {
            tokens.extend(tokenize(s));
        }
    }
    tokens
}

/// Pre-processed search query
#[derive(Debug, Clone)]
pub struct Query {
    phrase: String,
    tokens: Vec<String>,
}

impl Query {
    pub fn parse(query: &str) -> Self {
        let tokens: BTreeSet<String> = tokenize(query).collect();
        Self {
            phrase: query.trim().to_lowercase(),
            tokens: tokens.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.phrase.is_empty() && self.tokens.is_empty()
    }

    /// Score one record given its lowercased value and token set
    pub fn score(&self, lowered_value: &str, tokens: &HashSet<String>) -> f64 {
        let mut score = 0.0;
        if !self.tokens.is_empty() {
            let matched = self.tokens.iter().filter(|t| tokens.contains(*t)).count();
            score += matched as f64 / self.tokens.len() as f64;
        }
        if !self.phrase.is_empty() && lowered_value.contains(&self.phrase) {
            score += 1.0;
        }
        score
    }
}

/// Select the top `limit` (score, insertion index) pairs: score descending,
/// earlier insertion first on ties. Zero scores are dropped.
pub fn rank(mut scored: Vec<(f64, usize)>, limit: usize) -> Vec<usize> {
    scored.retain(|(score, _)| *score > 0.0);
    scored.sort_by(|a, b| match b.0.total_cmp(&a.0) {
        Ordering::Equal => a.1.cmp(&b.1),
        other => other,
    });
    scored.truncate(limit);
    scored.into_iter().map(|(_, index)| index).collect()
}
