//! File-backed collaborators: a JSON/JSONL corpus and a JSON transcript store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use context_protocol::{ChatHistoryStore, ConversationTurn, CorpusProvider, Document};
use sha2::{Digest, Sha256};

/// Corpus read from disk on every call.
///
/// `.jsonl` files hold one document per line; anything else is parsed as a
/// JSON array of documents. The revision is the SHA-256 of the file bytes,
/// so editing the file invalidates the lexical snapshot.
#[derive(Debug, Clone)]
pub struct FileCorpus {
    path: PathBuf,
}

impl FileCorpus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path)
            .with_context(|| format!("Failed to read corpus {}", self.path.display()))
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<Document>> {
        let jsonl = self
            .path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"));
        let documents = parse_corpus(bytes, jsonl)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        log::debug!("Loaded {} documents from {}", documents.len(), self.path.display());
        Ok(documents)
    }
}

pub fn parse_corpus(bytes: &[u8], jsonl: bool) -> Result<Vec<Document>> {
    if !jsonl {
        return serde_json::from_slice(bytes).context("Corpus is not a JSON array of documents");
    }
    let text = std::str::from_utf8(bytes).context("Corpus is not valid UTF-8")?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<Document>(line)
                .with_context(|| format!("Invalid document on line {}", idx + 1))
        })
        .collect()
}

fn content_revision(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[async_trait]
impl CorpusProvider for FileCorpus {
    async fn documents(&self) -> Result<Vec<Document>> {
        self.parse(&self.read()?)
    }

    async fn revision(&self) -> Result<Option<String>> {
        Ok(Some(content_revision(&self.read()?)))
    }

    /// Documents and revision come from the same read of the file.
    async fn load(&self) -> Result<(Vec<Document>, Option<String>)> {
        let bytes = self.read()?;
        let documents = self.parse(&bytes)?;
        Ok((documents, Some(content_revision(&bytes))))
    }
}

/// Transcripts stored as `{ "<session id>": [ {"query", "answer"}, ... ] }`.
#[derive(Debug, Clone)]
pub struct FileHistory {
    path: PathBuf,
}

impl FileHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ChatHistoryStore for FileHistory {
    async fn get_recent_turns(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read history {}", self.path.display()))?;
        let mut sessions: HashMap<String, Vec<ConversationTurn>> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid history file {}", self.path.display()))?;
        let mut turns = sessions.remove(session_id).unwrap_or_default();
        let start = turns.len().saturating_sub(limit);
        Ok(turns.split_off(start))
    }
}
