use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Small English stopword list; the index works without it, it just keeps
/// postings for function words out of the vocabulary.
pub const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could",
    "did", "do", "does", "for", "from", "had", "has", "have", "how", "i", "if", "in", "into",
    "is", "it", "its", "me", "my", "of", "on", "or", "our", "should", "so", "than", "that",
    "the", "their", "them", "then", "there", "these", "they", "this", "those", "to", "was",
    "we", "were", "what", "when", "where", "which", "who", "why", "will", "with", "would",
    "you", "your",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Drop [`ENGLISH_STOPWORDS`] from documents and queries
    pub remove_stopwords: bool,

    /// Tokens shorter than this (in chars) are dropped
    pub min_token_chars: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            remove_stopwords: true,
            min_token_chars: 1,
        }
    }
}

/// Lowercasing tokenizer splitting on non-alphanumeric boundaries.
///
/// The same instance must be used for documents and queries; the index
/// stores it next to the postings for that reason.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    config: TokenizerConfig,
    stopwords: HashSet<&'static str>,
}

impl Tokenizer {
    pub fn new(config: TokenizerConfig) -> Self {
        let stopwords = if config.remove_stopwords {
            ENGLISH_STOPWORDS.iter().copied().collect()
        } else {
            HashSet::new()
        };
        Self { config, stopwords }
    }

    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        split_words(text)
            .filter(|word| word.chars().count() >= self.config.min_token_chars)
            .filter(|word| !self.stopwords.contains(word.as_str()))
            .collect()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(TokenizerConfig::default())
    }
}

/// Lowercased alphanumeric runs of `text`, with no filtering applied.
pub fn split_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
}

pub fn is_stopword(word: &str) -> bool {
    ENGLISH_STOPWORDS.contains(&word)
}
