use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use context_lexical::{is_stopword, split_words};
use context_protocol::{ConversationTurn, TopicDecision};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::config::TopicConfig;

/// Decides whether a query continues the recent conversation.
///
/// Implementations see only the bounded window of recent turns (oldest
/// first) and keep no state between calls. Errors and timeouts are handled
/// by [`TopicClassifier`], which fails open to
/// [`TopicDecision::Continue`].
#[async_trait]
pub trait TopicStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn decide(
        &self,
        query: &str,
        window: &[ConversationTurn],
    ) -> anyhow::Result<TopicDecision>;
}

/// Pronouns that point back at something already discussed.
const ANAPHORA: &[&str] = &[
    "it", "its", "itself", "they", "them", "their", "theirs", "he", "him", "his", "she", "her",
    "hers", "same", "above", "previous", "former", "latter", "aforementioned",
];

/// Refer back unless they introduce a subject the window never mentioned.
const DEMONSTRATIVES: &[&str] = &["this", "that", "these", "those"];

/// "there" next to one of these is existential ("is there", "there are").
const BE_FORMS: &[&str] = &["is", "are", "was", "were", "be", "been", "s"];

/// Words that make sense only relative to a subject named earlier.
const GENERIC_FOLLOW_UPS: &[&str] = &[
    "price", "prices", "pricing", "cost", "costs", "fee", "fees", "plan", "plans", "process",
    "step", "steps", "setup", "requirement", "requirements", "feature", "features", "limit",
    "limits", "example", "examples", "detail", "details", "benefit", "benefits", "timeline",
    "duration", "eligibility", "documentation", "docs", "work", "works", "working", "use",
    "using", "configure", "configuration", "install", "installation", "support", "next",
    "else", "more", "instead", "alternative", "alternatives", "difference", "differences",
    "why", "explain", "elaborate", "again", "ok", "okay", "thanks", "please", "tell", "show",
    "give", "mean", "means", "apply", "applies", "cover", "covers", "include", "includes",
    "affect", "affects", "happen", "happens", "change", "changes", "matter", "matters",
];

static FOLLOW_UP_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^(what|how) about\b",
        r"^(and|also|but|so|then|or)\b",
        r"\b(tell me more|more details?|more info|go on|what else|anything else|any others?)\b",
        r"\b(same|similar) (thing|one|for|as)\b",
        r"^(why|how come|really|are you sure|and then)\W*$",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Cheap lexical heuristics; no model call involved.
///
/// Continues on anaphora, ellipsis, generic follow-ups, and any content-word
/// overlap with the window. Picks a new topic only when the query names
/// content words none of which appear in the window.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedTopicStrategy;

impl RuleBasedTopicStrategy {
    pub fn decide_sync(&self, query: &str, window: &[ConversationTurn]) -> TopicDecision {
        let normalized = query.trim().to_lowercase();
        let words: Vec<String> = split_words(&normalized).collect();
        let seen: HashSet<String> = window
            .iter()
            .flat_map(|turn| split_words(&turn.query).chain(split_words(&turn.answer)))
            .filter(|w| !is_stopword(w))
            .map(|w| stem(&w))
            .collect();

        if refers_back(&words, &seen) {
            return TopicDecision::Continue;
        }
        if FOLLOW_UP_PATTERNS.iter().any(|re| re.is_match(&normalized)) {
            return TopicDecision::Continue;
        }

        let content: HashSet<String> = words
            .iter()
            .filter(|w| is_content_word(w))
            .map(|w| stem(w))
            .collect();
        if content.is_empty() {
            return TopicDecision::Continue;
        }

        if content.iter().any(|w| seen.contains(w)) {
            TopicDecision::Continue
        } else {
            TopicDecision::NewTopic
        }
    }
}

fn is_content_word(word: &str) -> bool {
    !is_stopword(word) && !GENERIC_FOLLOW_UPS.contains(&word)
}

/// True when some word points at the earlier conversation.
///
/// Pronouns always do. A demonstrative does unless the word after it is an
/// unseen content word ("that refund policy"). "there" does unless it is
/// existential.
fn refers_back(words: &[String], seen: &HashSet<String>) -> bool {
    words.iter().enumerate().any(|(idx, word)| {
        let prev = idx.checked_sub(1).and_then(|i| words.get(i)).map(String::as_str);
        let next = words.get(idx + 1).map(String::as_str);
        match word.as_str() {
            w if ANAPHORA.contains(&w) => true,
            w if DEMONSTRATIVES.contains(&w) => {
                next.map_or(true, |n| !is_content_word(n) || seen.contains(&stem(n)))
            }
            "there" => {
                let existential = prev.is_some_and(|p| BE_FORMS.contains(&p))
                    || next.is_some_and(|n| BE_FORMS.contains(&n));
                !existential
            }
            _ => false,
        }
    })
}

#[async_trait]
impl TopicStrategy for RuleBasedTopicStrategy {
    fn name(&self) -> &str {
        "rule-based"
    }

    async fn decide(
        &self,
        query: &str,
        window: &[ConversationTurn],
    ) -> anyhow::Result<TopicDecision> {
        Ok(self.decide_sync(query, window))
    }
}

/// Plural folding so "invoice" and "invoices" overlap.
fn stem(word: &str) -> String {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    NoHistory,
    Strategy,
    FailOpenTimeout,
    FailOpenError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TopicVerdict {
    pub decision: TopicDecision,
    pub source: VerdictSource,
}

impl TopicVerdict {
    fn new(decision: TopicDecision, source: VerdictSource) -> Self {
        Self { decision, source }
    }
}

/// Runs a [`TopicStrategy`] over the recent window with a timeout.
#[derive(Clone)]
pub struct TopicClassifier {
    strategy: Arc<dyn TopicStrategy>,
    window_turns: usize,
    timeout: Duration,
}

impl TopicClassifier {
    pub fn new(strategy: Arc<dyn TopicStrategy>, config: &TopicConfig) -> Self {
        Self {
            strategy,
            window_turns: config.window_turns,
            timeout: config.timeout(),
        }
    }

    pub fn rule_based(config: &TopicConfig) -> Self {
        Self::new(Arc::new(RuleBasedTopicStrategy), config)
    }

    pub fn window_turns(&self) -> usize {
        self.window_turns
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// The last `window_turns` turns of `history`.
    pub fn window<'a>(&self, history: &'a [ConversationTurn]) -> &'a [ConversationTurn] {
        let start = history.len().saturating_sub(self.window_turns);
        &history[start..]
    }

    pub async fn classify(&self, query: &str, history: &[ConversationTurn]) -> TopicVerdict {
        let window = self.window(history);
        if window.is_empty() {
            return TopicVerdict::new(TopicDecision::NewTopic, VerdictSource::NoHistory);
        }

        match tokio::time::timeout(self.timeout, self.strategy.decide(query, window)).await {
            Ok(Ok(decision)) => {
                log::debug!(
                    "Topic strategy '{}' decided {} over {} turn(s)",
                    self.strategy.name(),
                    decision,
                    window.len()
                );
                TopicVerdict::new(decision, VerdictSource::Strategy)
            }
            Ok(Err(err)) => {
                log::warn!(
                    "Topic strategy '{}' failed, continuing topic: {:#}",
                    self.strategy.name(),
                    err
                );
                TopicVerdict::new(TopicDecision::Continue, VerdictSource::FailOpenError)
            }
            Err(_) => {
                log::warn!(
                    "Topic strategy '{}' timed out after {:?}, continuing topic",
                    self.strategy.name(),
                    self.timeout
                );
                TopicVerdict::new(TopicDecision::Continue, VerdictSource::FailOpenTimeout)
            }
        }
    }
}

impl std::fmt::Debug for TopicClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicClassifier")
            .field("strategy", &self.strategy.name())
            .field("window_turns", &self.window_turns)
            .field("timeout", &self.timeout)
            .finish()
    }
}
