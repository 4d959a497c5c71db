use std::collections::HashMap;

use context_lexical::split_words;
use serde::Serialize;

use crate::config::BoostConfig;
use crate::fusion::{final_order, RankedCandidate};

/// Phrases shorter than this (in chars, spaces included) only match exactly.
const NEAR_MATCH_MIN_CHARS: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechnicalPhrase {
    /// Normalized form: lowercase words joined by single spaces
    pub phrase: String,
    pub weight: f64,
    #[serde(skip)]
    words: Vec<String>,
    /// Words concatenated without separators
    #[serde(skip)]
    compact: String,
}

impl TechnicalPhrase {
    fn new(raw: &str, weight: f64) -> Self {
        let words: Vec<String> = split_words(raw).collect();
        Self {
            phrase: words.join(" "),
            weight,
            compact: words.concat(),
            words,
        }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }
}

/// Phrases from the vocabulary that a query mentions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TermMatches {
    phrases: Vec<TechnicalPhrase>,
}

impl TermMatches {
    pub fn is_technical(&self) -> bool {
        !self.phrases.is_empty()
    }

    pub fn phrases(&self) -> &[TechnicalPhrase] {
        &self.phrases
    }
}

/// Boosts candidates containing multi-word technical phrases named in the query.
#[derive(Debug, Clone)]
pub struct TermBooster {
    enabled: bool,
    vocabulary: Vec<TechnicalPhrase>,
    exact: HashMap<String, usize>,
    compact: HashMap<String, usize>,
    max_per_document: f64,
    near_match_distance: usize,
}

impl TermBooster {
    pub fn new(config: &BoostConfig) -> Self {
        let mut vocabulary: Vec<TechnicalPhrase> = Vec::with_capacity(config.phrases.len());
        let mut exact = HashMap::new();
        let mut compact = HashMap::new();

        for entry in &config.phrases {
            let phrase =
                TechnicalPhrase::new(&entry.phrase, entry.weight.unwrap_or(config.default_weight));
            if phrase.words.is_empty() || exact.contains_key(&phrase.phrase) {
                continue;
            }
            let idx = vocabulary.len();
            exact.insert(phrase.phrase.clone(), idx);
            compact.entry(phrase.compact.clone()).or_insert(idx);
            vocabulary.push(phrase);
        }

        Self {
            enabled: config.enabled && !vocabulary.is_empty(),
            vocabulary,
            exact,
            compact,
            max_per_document: config.max_per_document,
            near_match_distance: config.near_match_distance,
        }
    }

    pub fn disabled() -> Self {
        Self::new(&BoostConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn vocabulary(&self) -> &[TechnicalPhrase] {
        &self.vocabulary
    }

    /// Match the query's word bigrams and trigrams against the vocabulary.
    ///
    /// Besides exact matches, an n-gram matches a phrase when both agree once
    /// spaces are removed ("gpt4 turbo" vs "gpt 4 turbo"), or when a phrase of
    /// at least [`NEAR_MATCH_MIN_CHARS`] chars is within the configured edit
    /// distance ("conection pool" vs "connection pool").
    pub fn detect(&self, query: &str) -> TermMatches {
        if !self.enabled {
            return TermMatches::default();
        }
        let words: Vec<String> = split_words(query).collect();
        let mut hit = vec![false; self.vocabulary.len()];

        for n in 2..=3 {
            for window in words.windows(n) {
                if let Some(idx) = self.match_ngram(window) {
                    hit[idx] = true;
                }
            }
        }

        let phrases: Vec<TechnicalPhrase> = self
            .vocabulary
            .iter()
            .zip(hit)
            .filter_map(|(phrase, hit)| hit.then(|| phrase.clone()))
            .collect();
        if !phrases.is_empty() {
            log::debug!(
                "Technical phrases in query: {:?}",
                phrases.iter().map(|p| p.phrase.as_str()).collect::<Vec<_>>()
            );
        }
        TermMatches { phrases }
    }

    fn match_ngram(&self, window: &[String]) -> Option<usize> {
        let joined = window.join(" ");
        if let Some(&idx) = self.exact.get(&joined) {
            return Some(idx);
        }
        if let Some(&idx) = self.compact.get(&window.concat()) {
            return Some(idx);
        }
        if self.near_match_distance == 0 {
            return None;
        }
        self.vocabulary
            .iter()
            .enumerate()
            .filter(|(_, phrase)| {
                phrase.words.len() == window.len() && phrase.phrase.len() >= NEAR_MATCH_MIN_CHARS
            })
            .map(|(idx, phrase)| (idx, levenshtein(&phrase.phrase, &joined)))
            .filter(|&(_, distance)| distance <= self.near_match_distance)
            .min_by_key(|&(idx, distance)| (distance, idx))
            .map(|(idx, _)| idx)
    }

    /// Add phrase boosts to the candidates and re-sort them.
    ///
    /// A no-op when the query matched no phrase, so non-technical queries keep
    /// their fused order exactly.
    pub fn apply(&self, matches: &TermMatches, candidates: &mut [RankedCandidate]) {
        if !matches.is_technical() {
            return;
        }

        let mut boosted = 0usize;
        for candidate in candidates.iter_mut() {
            let words: Vec<String> = split_words(&candidate.document.content).collect();
            let raw: f64 = matches
                .phrases
                .iter()
                .map(|phrase| phrase.weight * count_occurrences(&words, &phrase.compact) as f64)
                .sum();
            candidate.boost_score = raw.min(self.max_per_document);
            if candidate.boost_score > 0.0 {
                boosted += 1;
            }
        }
        candidates.sort_by(final_order);

        log::debug!(
            "Boosted {}/{} candidates for {} phrase(s)",
            boosted,
            candidates.len(),
            matches.phrases.len()
        );
    }
}

/// Non-overlapping runs of whole words that spell `compact` once spaces are
/// dropped, so "gpt4 turbo" and "gpt 4 turbo" both count for the same phrase.
fn count_occurrences(haystack: &[String], compact: &str) -> usize {
    if compact.is_empty() {
        return 0;
    }
    let mut count = 0;
    let mut i = 0;
    while i < haystack.len() {
        match run_length(&haystack[i..], compact) {
            Some(len) => {
                count += 1;
                i += len;
            }
            None => i += 1,
        }
    }
    count
}

/// Number of leading words whose concatenation is exactly `compact`.
fn run_length(words: &[String], compact: &str) -> Option<usize> {
    let mut rest = compact;
    for (idx, word) in words.iter().enumerate() {
        rest = rest.strip_prefix(word.as_str())?;
        if rest.is_empty() {
            return Some(idx + 1);
        }
    }
    None
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhraseConfig;
    use crate::fusion::RrfFusion;
    use context_lexical::LexicalHit;
    use context_protocol::{Document, SemanticHit};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn booster(phrases: &[&str]) -> TermBooster {
        TermBooster::new(&BoostConfig {
            enabled: true,
            phrases: phrases.iter().map(|p| PhraseConfig::new(*p)).collect(),
            ..BoostConfig::default()
        })
    }

    fn matched(matches: &TermMatches) -> Vec<&str> {
        matches.phrases().iter().map(|p| p.phrase.as_str()).collect()
    }

    fn candidates(docs: &[(&str, &str)]) -> Vec<RankedCandidate> {
        let hits: Vec<LexicalHit> = docs
            .iter()
            .enumerate()
            .map(|(i, (id, content))| LexicalHit {
                document: Arc::new(Document::new(*id, *content)),
                score: 1.0,
                rank: i + 1,
            })
            .collect();
        RrfFusion::default().fuse(&hits, &Vec::<SemanticHit>::new())
    }

    #[test]
    fn detects_exact_phrases_case_insensitively() {
        let b = booster(&["rate limit", "connection pool exhausted"]);
        let matches = b.detect("Why do I hit the Rate Limit when the connection pool exhausted?");
        assert_eq!(matched(&matches), vec!["rate limit", "connection pool exhausted"]);
    }

    #[test]
    fn detects_spacing_variants() {
        let b = booster(&["gpt 4 turbo"]);
        assert!(b.detect("is gpt4 turbo cheaper").is_technical());
        assert!(b.detect("is GPT-4 Turbo cheaper").is_technical());
    }

    #[test]
    fn detects_near_misspellings_of_long_phrases() {
        let b = booster(&["connection pool"]);
        assert!(b.detect("conection pool errors").is_technical());
        assert!(!b.detect("collection tool errors").is_technical());
    }

    #[test]
    fn short_phrases_need_exact_match() {
        let b = booster(&["tx id"]);
        assert!(b.detect("where is my tx id").is_technical());
        assert!(!b.detect("where is my tx is").is_technical());
    }

    #[test]
    fn disabled_booster_detects_nothing() {
        assert!(!TermBooster::disabled().detect("rate limit").is_technical());
    }

    #[test]
    fn boost_promotes_documents_with_the_phrase() {
        let b = booster(&["rate limit"]);
        let matches = b.detect("rate limit exceeded");
        let mut list = candidates(&[
            ("generic", "limits apply to every plan"),
            ("specific", "the API rate limit is 100 requests per minute"),
        ]);

        b.apply(&matches, &mut list);
        assert_eq!(list[0].id(), "specific");
        assert_eq!(list[0].boost_score, 0.01);
        assert_eq!(list[1].boost_score, 0.0);
    }

    #[test]
    fn boost_is_capped_per_document() {
        let b = booster(&["rate limit"]);
        let matches = b.detect("rate limit");
        let mut list = candidates(&[(
            "spam",
            "rate limit rate limit rate limit rate limit rate limit",
        )]);

        b.apply(&matches, &mut list);
        assert_eq!(list[0].boost_score, 0.03);
    }

    #[test]
    fn non_technical_query_leaves_order_untouched() {
        let b = booster(&["rate limit"]);
        let mut list = candidates(&[("a", "rate limit"), ("b", "other")]);
        let before: Vec<String> = list.iter().map(|c| c.id().to_string()).collect();

        b.apply(&b.detect("how do refunds work"), &mut list);
        let after: Vec<String> = list.iter().map(|c| c.id().to_string()).collect();
        assert_eq!(before, after);
        assert!(list.iter().all(|c| c.boost_score == 0.0));
    }

    #[test]
    fn occurrences_do_not_overlap() {
        let words = |s: &str| split_words(s).collect::<Vec<_>>();
        assert_eq!(count_occurrences(&words("a a a"), "aa"), 1);
        assert_eq!(count_occurrences(&words("rate limiter"), "ratelimit"), 0);
        assert_eq!(count_occurrences(&words("gpt4 turbo or GPT-4-Turbo"), "gpt4turbo"), 2);
    }

    #[test]
    fn spacing_variants_in_content_are_boosted() {
        let b = booster(&["gpt 4 turbo"]);
        let matches = b.detect("gpt4 turbo pricing");
        let mut list = candidates(&[
            ("plain", "pricing for every model"),
            ("joined", "gpt4 turbo pricing per token"),
            ("split", "GPT 4 Turbo pricing per token"),
        ]);

        b.apply(&matches, &mut list);
        let boosted: Vec<(&str, f64)> = list.iter().map(|c| (c.id(), c.boost_score)).collect();
        assert_eq!(boosted, vec![("joined", 0.01), ("split", 0.01), ("plain", 0.0)]);
    }

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }
}
