use context_protocol::{ConversationTurn, TopicDecision};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::TopicConfig;

/// Folds a condensed summary of the preceding turns into follow-up queries.
#[derive(Debug, Clone)]
pub struct QueryExpander {
    expansion_turns: usize,
    summary_chars: usize,
}

impl QueryExpander {
    pub fn new(config: &TopicConfig) -> Self {
        Self {
            expansion_turns: config.expansion_turns,
            summary_chars: config.summary_chars,
        }
    }

    /// Prior query plus the first sentence of its answer, for each of the
    /// last `expansion_turns` turns, capped at `summary_chars` characters.
    pub fn condense(&self, history: &[ConversationTurn]) -> Option<String> {
        let start = history.len().saturating_sub(self.expansion_turns);
        let parts: Vec<String> = history[start..]
            .iter()
            .map(|turn| {
                let query = turn.query.trim();
                match first_sentence(&turn.answer) {
                    Some(sentence) if !query.is_empty() => format!("{query} {sentence}"),
                    Some(sentence) => sentence.to_string(),
                    None => query.to_string(),
                }
            })
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() {
            return None;
        }

        let summary: String = parts.join(" ").chars().take(self.summary_chars).collect();
        let summary = summary.trim_end().to_string();
        (!summary.is_empty()).then_some(summary)
    }

    /// The query used for retrieval: unchanged on a new topic, extended with
    /// the condensed history on a continuation.
    pub fn expand(
        &self,
        query: &str,
        decision: TopicDecision,
        history: &[ConversationTurn],
    ) -> String {
        let query = query.trim();
        if !decision.is_continue() {
            return query.to_string();
        }
        match self.condense(history) {
            Some(summary) => {
                log::debug!(
                    "Expanded follow-up query with {} chars of history",
                    summary.chars().count()
                );
                format!("{query}\n{summary}")
            }
            None => query.to_string(),
        }
    }
}

fn first_sentence(text: &str) -> Option<&str> {
    text.unicode_sentences()
        .map(str::trim)
        .find(|sentence| !sentence.is_empty())
}
