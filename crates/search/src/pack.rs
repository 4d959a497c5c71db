use std::collections::HashSet;
use std::sync::Arc;

use context_lexical::split_words;
use context_protocol::Document;
use serde::Serialize;

use crate::config::PackingConfig;
use crate::fusion::RankedCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackStop {
    /// The next candidate would have overflowed the token budget
    BudgetExhausted,
    MaxDocuments,
}

/// Final ordered context handed to the answer generator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PackedContext {
    pub documents: Vec<Arc<Document>>,
    pub total_tokens: usize,
    pub dropped_duplicates: Vec<String>,
    pub skipped_oversized: Vec<String>,
    pub stopped: Option<PackStop>,
}

impl PackedContext {
    pub fn ids(&self) -> Vec<&str> {
        self.documents.iter().map(|d| d.id.as_str()).collect()
    }
}

/// Near-duplicate removal plus greedy packing under a token budget.
#[derive(Debug, Clone)]
pub struct ContextPacker {
    config: PackingConfig,
}

impl ContextPacker {
    pub fn new(config: PackingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PackingConfig {
        &self.config
    }

    /// Rough token count: one token per `chars_per_token` characters, rounded up.
    pub fn estimate_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.config.chars_per_token.max(1))
    }

    /// Walk candidates in ranked order, keeping each one that is not a
    /// near-duplicate of an already kept document and still fits.
    ///
    /// A candidate larger than the whole budget is skipped and packing goes
    /// on. The first candidate that fits on its own but not in what is left
    /// ends packing.
    pub fn pack(&self, candidates: Vec<RankedCandidate>) -> PackedContext {
        let budget = self.config.token_budget;
        let mut packed = PackedContext::default();
        let mut kept_sets: Vec<HashSet<String>> = Vec::new();

        for candidate in candidates {
            if packed.documents.len() >= self.config.max_documents {
                packed.stopped = Some(PackStop::MaxDocuments);
                break;
            }

            let words = word_set(&candidate.document.content);
            if kept_sets
                .iter()
                .any(|kept| jaccard(kept, &words) >= self.config.similarity_threshold)
            {
                packed.dropped_duplicates.push(candidate.document.id.clone());
                continue;
            }

            let cost = self.estimate_tokens(&candidate.document.content);
            if cost > budget {
                log::debug!(
                    "Skipping oversized document {} ({} tokens > budget {})",
                    candidate.document.id,
                    cost,
                    budget
                );
                packed.skipped_oversized.push(candidate.document.id.clone());
                continue;
            }
            if packed.total_tokens + cost > budget {
                packed.stopped = Some(PackStop::BudgetExhausted);
                break;
            }

            packed.total_tokens += cost;
            kept_sets.push(words);
            packed.documents.push(candidate.document);
        }

        log::debug!(
            "Packed {} documents ({} tokens), {} duplicates dropped, {} oversized",
            packed.documents.len(),
            packed.total_tokens,
            packed.dropped_duplicates.len(),
            packed.skipped_oversized.len()
        );
        packed
    }
}

impl Default for ContextPacker {
    fn default() -> Self {
        Self::new(PackingConfig::default())
    }
}

fn word_set(text: &str) -> HashSet<String> {
    split_words(text).collect()
}

/// Token-set Jaccard similarity. Two empty sets are identical.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}
