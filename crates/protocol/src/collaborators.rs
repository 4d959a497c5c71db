use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::{ConversationTurn, Document, SemanticHit};

/// Nearest-neighbour search over query embeddings.
///
/// Embedding generation and the vector index live behind this call. The
/// engine treats every error or timeout as a degraded source and continues
/// with lexical candidates only.
#[async_trait]
pub trait SemanticRetriever: Send + Sync {
    /// Returns up to `k` hits ordered by similarity, ranks starting at 1.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SemanticHit>>;
}

/// Supplies the document set the lexical index is built from.
#[async_trait]
pub trait CorpusProvider: Send + Sync {
    /// Full current corpus snapshot.
    async fn documents(&self) -> Result<Vec<Document>>;

    /// Opaque change signal. A different value than the one the live index
    /// was built from triggers a rebuild; `None` means the provider cannot
    /// tell and only the staleness window applies.
    async fn revision(&self) -> Result<Option<String>> {
        Ok(None)
    }

    /// Documents together with the revision they were read at.
    ///
    /// Providers that can derive both from a single read should override
    /// this, so an index is never tagged with a revision its content does
    /// not match.
    async fn load(&self) -> Result<(Vec<Document>, Option<String>)> {
        let revision = self.revision().await?;
        let documents = self.documents().await?;
        Ok((documents, revision))
    }
}

/// Read-only access to prior turns of a chat session.
#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    /// At most `limit` turns, oldest first, most recent last.
    async fn get_recent_turns(&self, session_id: &str, limit: usize)
        -> Result<Vec<ConversationTurn>>;
}

/// Downstream consumer of the packed context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, query: &str, documents: &[Arc<Document>]) -> Result<String>;
}
