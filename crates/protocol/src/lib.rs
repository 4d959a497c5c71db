//! # Context Protocol
//!
//! Shared data model for the retrieval engine and the contracts of the
//! collaborators it consumes (semantic retriever, corpus provider, chat
//! history store, answer generator).
//!
//! Nothing in this crate performs retrieval. It only fixes the shapes that
//! cross crate and service boundaries.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod collaborators;
mod memory;

pub use collaborators::{AnswerGenerator, ChatHistoryStore, CorpusProvider, SemanticRetriever};
pub use memory::{InMemoryCorpus, InMemoryHistory};

/// Scalar metadata attached to a document (source type, origin path,
/// freshness timestamp, provenance tags).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A retrievable unit of text.
///
/// Documents are immutable once indexed; the retrieval path only ever holds
/// them behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Document {
    /// Stable identifier, unique within the corpus
    pub id: String,

    /// Body text used for scoring and context
    pub content: String,

    /// Provenance and freshness tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Builder-style metadata setter
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_text(&self, key: &str) -> Option<&str> {
        match self.metadata.get(key) {
            Some(MetadataValue::Text(value)) => Some(value.as_str()),
            _ => None,
        }
    }
}

/// One prior (query, answer) exchange of a chat session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConversationTurn {
    pub query: String,
    pub answer: String,
}

impl ConversationTurn {
    pub fn new(query: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            answer: answer.into(),
        }
    }
}

/// Whether the incoming query continues the current exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TopicDecision {
    Continue,
    NewTopic,
}

impl TopicDecision {
    #[must_use]
    pub const fn is_continue(self) -> bool {
        matches!(self, Self::Continue)
    }
}

impl fmt::Display for TopicDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => f.write_str("continue"),
            Self::NewTopic => f.write_str("new_topic"),
        }
    }
}

/// A nearest-neighbour passage returned by the semantic retriever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticHit {
    pub document: Arc<Document>,

    /// 1-based position in the retriever's similarity ranking
    pub rank: usize,
}

impl SemanticHit {
    pub fn new(document: impl Into<Arc<Document>>, rank: usize) -> Self {
        Self {
            document: document.into(),
            rank,
        }
    }
}
