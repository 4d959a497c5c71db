//! In-memory collaborators for tests and embedded use.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::{ChatHistoryStore, ConversationTurn, CorpusProvider, Document};

/// Corpus held in memory; every [`replace`](InMemoryCorpus::replace) bumps the revision.
#[derive(Debug, Default)]
pub struct InMemoryCorpus {
    state: RwLock<(u64, Vec<Document>)>,
}

impl InMemoryCorpus {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            state: RwLock::new((1, documents)),
        }
    }

    pub fn replace(&self, documents: Vec<Document>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.0 += 1;
        state.1 = documents;
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(|e| e.into_inner()).1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CorpusProvider for InMemoryCorpus {
    async fn documents(&self) -> Result<Vec<Document>> {
        Ok(self.state.read().unwrap_or_else(|e| e.into_inner()).1.clone())
    }

    async fn revision(&self) -> Result<Option<String>> {
        let revision = self.state.read().unwrap_or_else(|e| e.into_inner()).0;
        Ok(Some(revision.to_string()))
    }

    async fn load(&self) -> Result<(Vec<Document>, Option<String>)> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok((state.1.clone(), Some(state.0.to_string())))
    }
}

/// Session transcripts held in memory.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    sessions: RwLock<HashMap<String, Vec<ConversationTurn>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, session_id: &str, turn: ConversationTurn) {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(session_id.to_string())
            .or_default()
            .push(turn);
    }
}

#[async_trait]
impl ChatHistoryStore for InMemoryHistory {
    async fn get_recent_turns(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let Some(turns) = sessions.get(session_id) else {
            return Ok(Vec::new());
        };
        let start = turns.len().saturating_sub(limit);
        Ok(turns[start..].to_vec())
    }
}
