//! Search text analysis: tokenization, stop words and stemming.

use rust_stemmers::{Algorithm, Stemmer};
use std::{collections::HashSet, sync::LazyLock};

/// Shared analyzer instance for all workers.
pub static ANALYZER: LazyLock<Analyzer> = LazyLock::new(Analyzer::new);

/// English stop words dropped before stemming.
static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "had", "has",
        "have", "he", "her", "his", "how", "i", "if", "in", "into", "is", "it", "its", "me",
        "my", "no", "not", "of", "on", "or", "our", "she", "so", "that", "the", "their", "them",
        "then", "there", "these", "they", "this", "to", "up", "was", "we", "were", "what",
        "when", "where", "which", "who", "why", "will", "with", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Tokenizer with Porter stemming, matching what the query engine
/// applies to user input.
pub struct Analyzer {
    stemmer: Stemmer,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    /// Tokenize: lowercase, split on non-alphanumerics, drop stop
    /// words, stem, drop tokens shorter than 2 chars.
    ///
    /// The returned length is the BM25 document length (counted after
    /// the length filter).
    pub fn analyze(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        for raw in text.split(|c: char| !c.is_alphanumeric()) {
            if raw.is_empty() {
                continue;
            }
            let lowered = raw.to_lowercase();
            if STOP_WORDS.contains(lowered.as_str()) {
                continue;
            }
            let stemmed = self.stemmer.stem(&lowered);
            if stemmed.len() >= 2 {
                tokens.push(stemmed.into_owned());
            }
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_lowercases_and_splits() {
        let tokens = ANALYZER.analyze("Hello, World!");
        assert_eq!(tokens, vec!["hello", "world"]);
    }

    #[test]
    fn test_analyze_drops_stop_words() {
        let tokens = ANALYZER.analyze("the quick fox and the dog");
        assert_eq!(tokens, vec!["quick", "fox", "dog"]);
    }

    #[test]
    fn test_analyze_stems() {
        let tokens = ANALYZER.analyze("running builds caches");
        assert_eq!(tokens, vec!["run", "build", "cach"]);
    }

    #[test]
    fn test_analyze_drops_short_tokens() {
        // "x" survives splitting but falls to the length filter
        let tokens = ANALYZER.analyze("x marks spot");
        assert_eq!(tokens, vec!["mark", "spot"]);
    }

    #[test]
    fn test_analyze_empty() {
        assert!(ANALYZER.analyze("").is_empty());
        assert!(ANALYZER.analyze("  ,.!  ").is_empty());
    }

    #[test]
    fn test_analyze_numbers_kept() {
        let tokens = ANALYZER.analyze("version 42 rocks");
        assert_eq!(tokens, vec!["version", "42", "rock"]);
    }
}
