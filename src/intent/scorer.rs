//! Relevance scoring
//!
//! The extractor only talks to [`RelevanceScorer`], so token overlap can be
//! swapped for fuzzy, edit-distance or embedding-based scoring without
//! touching the selection logic.

use crate::knowledge::{IndexedColumn, IndexedTable};
use std::collections::BTreeSet;
use strsim::jaro_winkler;

pub trait RelevanceScorer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Question tokens matched by `tokens`, with the strength of each match (0.0–1.0]
    fn matches<'q>(&self, question: &'q [String], tokens: &BTreeSet<String>) -> Vec<(&'q str, f64)>;

    fn score_tokens(&self, question: &[String], tokens: &BTreeSet<String>) -> f64 {
        self.matches(question, tokens).iter().map(|(_, s)| s).sum()
    }

    fn score_column(&self, question: &[String], column: &IndexedColumn) -> f64 {
        self.score_tokens(question, &column.tokens)
    }

    /// Table-level tokens plus the score of every column
    fn score_table(&self, question: &[String], table: &IndexedTable) -> f64 {
        self.score_tokens(question, &table.tokens)
            + table
                .columns
                .iter()
                .map(|c| self.score_column(question, c))
                .sum::<f64>()
    }
}

/// Exact token overlap: each shared token counts 1.0
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenOverlapScorer;

impl RelevanceScorer for TokenOverlapScorer {
    fn name(&self) -> &'static str {
        "token_overlap"
    }

    fn matches<'q>(&self, question: &'q [String], tokens: &BTreeSet<String>) -> Vec<(&'q str, f64)> {
        question
            .iter()
            .filter(|q| tokens.contains(q.as_str()))
            .map(|q| (q.as_str(), 1.0))
            .collect()
    }
}

/// Jaro-Winkler similarity per token, tolerant of typos and plural forms
#[derive(Debug, Clone, Copy)]
pub struct FuzzyScorer {
    /// Similarity threshold (0.0-1.0) for considering two tokens a match
    pub similarity_threshold: f64,
}

impl Default for FuzzyScorer {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.9,
        }
    }
}

impl FuzzyScorer {
    pub fn new(similarity_threshold: f64) -> Self {
        Self { similarity_threshold }
    }
}

impl RelevanceScorer for FuzzyScorer {
    fn name(&self) -> &'static str {
        "fuzzy"
    }

    fn matches<'q>(&self, question: &'q [String], tokens: &BTreeSet<String>) -> Vec<(&'q str, f64)> {
        question
            .iter()
            .filter_map(|q| {
                if tokens.contains(q.as_str()) {
                    return Some((q.as_str(), 1.0));
                }
                // Very short tokens produce noisy similarities ("id" vs "is")
                if q.len() < 4 {
                    return None;
                }
                let best = tokens
                    .iter()
                    .filter(|t| t.len() >= 4)
                    .map(|t| jaro_winkler(q, t))
                    .fold(0.0_f64, f64::max);
                (best >= self.similarity_threshold).then_some((q.as_str(), best))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(tokens: &[&str]) -> BTreeSet<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    fn q(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_overlap_counts_shared_tokens() {
        let scorer = TokenOverlapScorer;
        let score = scorer.score_tokens(&q(&["total", "orders", "status"]), &set(&["orders", "status"]));
        assert_eq!(score, 2.0);
        assert_eq!(scorer.score_tokens(&q(&["weather"]), &set(&["orders"])), 0.0);
    }

    #[test]
    fn test_fuzzy_tolerates_plural_and_typo() {
        let scorer = FuzzyScorer::default();
        let tokens = set(&["customers", "orders"]);
        let question = q(&["customer", "ordres", "id"]);
        let matched = scorer.matches(&question, &tokens);
        let names: Vec<&str> = matched.iter().map(|(t, _)| *t).collect();
        assert!(names.contains(&"customer"));
        assert!(names.contains(&"ordres"));
        assert!(!names.contains(&"id"));
        // score reflects match strength rather than a constant
        assert!(matched.iter().all(|(_, s)| *s > 0.9 && *s < 1.0));
    }
}
