//! Tokenizer shared by the index builder and the intent extractor.
//!
//! Lower-cases, splits on non-alphanumeric boundaries and drops stop words.
//! Both sides of every comparison must go through the same normalization.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};

lazy_static! {
    static ref SPLIT: Regex = Regex::new(r"[^\p{L}\p{N}]+").unwrap();
    static ref STOP_WORDS: HashSet<&'static str> = [
        "a", "an", "the", "of", "for", "by", "in", "on", "to", "and", "or", "with", "at", "as",
        "from", "into", "is", "are", "was", "were", "be", "been", "has", "have", "had", "do",
        "does", "did", "show", "me", "list", "give", "get", "find", "display", "tell", "what",
        "which", "who", "whom", "whose", "where", "when", "all", "each", "every", "per", "please",
        "i", "my", "we", "our", "us", "you", "your", "it", "its", "this", "that", "these", "those",
        "there", "their", "them", "they", "can", "could", "would", "should", "will",
    ]
    .into_iter()
    .collect();
}

/// Every lower-cased word in order, stop words included
pub fn words(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    SPLIT
        .split(&lowered)
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Ordered token sequence (duplicates kept) without stop words
pub fn token_sequence(text: &str) -> Vec<String> {
    words(text)
        .into_iter()
        .filter(|t| !STOP_WORDS.contains(t.as_str()))
        .collect()
}

/// Deduplicated tokens in first-occurrence order
pub fn tokenize(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    token_sequence(text)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Token set over several text fragments
pub fn token_set<'a, I>(fragments: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    fragments.into_iter().flat_map(token_sequence).collect()
}

/// Whether `phrase` appears as a contiguous run inside `sequence`
pub fn contains_phrase(sequence: &[String], phrase: &[String]) -> bool {
    if phrase.is_empty() || phrase.len() > sequence.len() {
        return false;
    }
    sequence.windows(phrase.len()).any(|w| w == phrase)
}

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_splits_and_drops_stop_words() {
        assert_eq!(tokenize("Show total Orders by status"), vec!["total", "orders", "status"]);
        assert_eq!(tokenize("customer_id"), vec!["customer", "id"]);
        assert_eq!(tokenize("orders, ORDERS; orders"), vec!["orders"]);
    }

    #[test]
    fn test_non_ascii_words_stay_whole() {
        assert_eq!(tokenize("Café Müller orders"), vec!["café", "müller", "orders"]);
        assert_eq!(words("this month"), vec!["this", "month"]);
    }

    #[test]
    fn test_phrase_matching() {
        let seq = token_sequence("orders for customer Acme last month");
        assert!(contains_phrase(&seq, &token_sequence("last month")));
        assert!(!contains_phrase(&seq, &token_sequence("last quarter")));
        assert!(!contains_phrase(&seq, &[]));
    }
}
