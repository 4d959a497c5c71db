use std::sync::Arc;
use std::time::{Duration, Instant};

use context_lexical::{LexicalIndexHandle, RefreshOutcome};
use context_protocol::{
    AnswerGenerator, ChatHistoryStore, ConversationTurn, CorpusProvider, Document, SemanticHit,
    SemanticRetriever, TopicDecision,
};
use serde::Serialize;

use crate::boost::TermBooster;
use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::expansion::QueryExpander;
use crate::fusion::RrfFusion;
use crate::pack::{ContextPacker, PackStop};
use crate::topic::{TopicClassifier, TopicStrategy, TopicVerdict, VerdictSource};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticStatus {
    Ok,
    #[default]
    Disabled,
    TimedOut,
    Failed,
}

/// Per-stage counts for one request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalDiagnostics {
    pub lexical_hits: usize,
    pub semantic: SemanticStatus,
    pub semantic_hits: usize,
    pub fused_candidates: usize,
    pub technical_phrases: Vec<String>,
    pub dropped_duplicates: Vec<String>,
    pub skipped_oversized: Vec<String>,
    pub total_tokens: usize,
    pub stopped: Option<PackStop>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalOutcome {
    pub query: String,
    /// Query actually sent to both retrievers
    pub retrieval_query: String,
    pub topic: TopicVerdict,
    pub documents: Vec<Arc<Document>>,
    pub diagnostics: RetrievalDiagnostics,
}

impl RetrievalOutcome {
    pub fn ids(&self) -> Vec<&str> {
        self.documents.iter().map(|d| d.id.as_str()).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub answer: String,
    pub outcome: RetrievalOutcome,
}

/// Hybrid retrieval pipeline:
/// classify → expand → lexical ‖ semantic → fuse → boost → dedupe/pack.
///
/// Requests share the engine by reference. Sub-calls are polled inside the
/// request future, so dropping it cancels the in-flight semantic call and
/// topic strategy.
pub struct RetrievalEngine {
    lexical: Arc<LexicalIndexHandle>,
    semantic: Option<Arc<dyn SemanticRetriever>>,
    classifier: TopicClassifier,
    expander: QueryExpander,
    fusion: RrfFusion,
    booster: TermBooster,
    packer: ContextPacker,
    lexical_k: usize,
    semantic_k: usize,
    semantic_timeout: Duration,
}

impl RetrievalEngine {
    pub fn new(config: &RetrievalConfig, lexical: Arc<LexicalIndexHandle>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            lexical,
            semantic: None,
            classifier: TopicClassifier::rule_based(&config.topic),
            expander: QueryExpander::new(&config.topic),
            fusion: RrfFusion::new(config.fusion.k),
            booster: TermBooster::new(&config.boost),
            packer: ContextPacker::new(config.packing.clone()),
            lexical_k: config.lexical.top_k,
            semantic_k: if config.semantic.enabled {
                config.semantic.top_k
            } else {
                0
            },
            semantic_timeout: config.semantic.timeout(),
        })
    }

    /// Attach the semantic retriever. Ignored when semantic retrieval is
    /// disabled in the configuration.
    pub fn with_semantic(mut self, retriever: Arc<dyn SemanticRetriever>) -> Self {
        if self.semantic_k > 0 {
            self.semantic = Some(retriever);
        }
        self
    }

    pub fn with_topic_strategy(
        mut self,
        strategy: Arc<dyn TopicStrategy>,
        config: &RetrievalConfig,
    ) -> Self {
        self.classifier = TopicClassifier::new(strategy, &config.topic);
        self
    }

    pub fn lexical(&self) -> &Arc<LexicalIndexHandle> {
        &self.lexical
    }

    pub fn classifier(&self) -> &TopicClassifier {
        &self.classifier
    }

    /// Rebuild the lexical snapshot if it is due. Failures are logged and the
    /// current snapshot stays in service.
    pub async fn refresh_index(&self, provider: &dyn CorpusProvider) -> Option<RefreshOutcome> {
        match self.lexical.refresh(provider).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                log::warn!("Lexical index refresh failed, serving previous snapshot: {}", err);
                None
            }
        }
    }

    /// Run the full pipeline for one query over the given history (oldest first).
    pub async fn retrieve(&self, query: &str, history: &[ConversationTurn]) -> RetrievalOutcome {
        let started = Instant::now();
        let query = query.trim();
        if query.is_empty() {
            log::debug!("Empty query, nothing to retrieve");
            return RetrievalOutcome {
                query: String::new(),
                retrieval_query: String::new(),
                topic: TopicVerdict {
                    decision: TopicDecision::NewTopic,
                    source: VerdictSource::NoHistory,
                },
                documents: Vec::new(),
                diagnostics: RetrievalDiagnostics::default(),
            };
        }

        let topic = self.classifier.classify(query, history).await;
        let retrieval_query = self.expander.expand(query, topic.decision, history);

        // The semantic future is polled first so its request is in flight
        // before the synchronous lexical scoring runs.
        let ((semantic_status, semantic_hits), lexical_hits) = tokio::join!(
            self.semantic_search(&retrieval_query),
            async {
                self.lexical
                    .snapshot()
                    .search(&retrieval_query, self.lexical_k)
            },
        );
        log::debug!(
            "Retrieved {} lexical and {} semantic hits ({:?})",
            lexical_hits.len(),
            semantic_hits.len(),
            semantic_status
        );

        let mut candidates = self.fusion.fuse(&lexical_hits, &semantic_hits);
        let fused_candidates = candidates.len();

        // Phrase detection looks at what the user typed, not the expansion.
        let matches = self.booster.detect(query);
        self.booster.apply(&matches, &mut candidates);

        let packed = self.packer.pack(candidates);

        let diagnostics = RetrievalDiagnostics {
            lexical_hits: lexical_hits.len(),
            semantic: semantic_status,
            semantic_hits: semantic_hits.len(),
            fused_candidates,
            technical_phrases: matches.phrases().iter().map(|p| p.phrase.clone()).collect(),
            dropped_duplicates: packed.dropped_duplicates,
            skipped_oversized: packed.skipped_oversized,
            total_tokens: packed.total_tokens,
            stopped: packed.stopped,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        log::debug!(
            "Retrieval finished: topic={} ({:?}), {} documents, {} tokens in {}ms",
            topic.decision,
            topic.source,
            packed.documents.len(),
            diagnostics.total_tokens,
            diagnostics.elapsed_ms
        );

        RetrievalOutcome {
            query: query.to_string(),
            retrieval_query,
            topic,
            documents: packed.documents,
            diagnostics,
        }
    }

    /// Like [`retrieve`](Self::retrieve), loading the window from a history
    /// store. An unavailable store counts as an empty history.
    pub async fn retrieve_for_session(
        &self,
        history: &dyn ChatHistoryStore,
        session_id: &str,
        query: &str,
    ) -> RetrievalOutcome {
        let turns = self.load_history(history, session_id).await;
        self.retrieve(query, &turns).await
    }

    /// One conversational turn: history → retrieval → answer generation.
    pub async fn respond(
        &self,
        history: &dyn ChatHistoryStore,
        generator: &dyn AnswerGenerator,
        session_id: &str,
        query: &str,
    ) -> anyhow::Result<TurnResponse> {
        let outcome = self.retrieve_for_session(history, session_id, query).await;
        let answer = generator
            .generate(&outcome.retrieval_query, &outcome.documents)
            .await?;
        Ok(TurnResponse { answer, outcome })
    }

    async fn load_history(
        &self,
        history: &dyn ChatHistoryStore,
        session_id: &str,
    ) -> Vec<ConversationTurn> {
        match history
            .get_recent_turns(session_id, self.classifier.window_turns())
            .await
        {
            Ok(turns) => turns,
            Err(err) => {
                log::warn!(
                    "History for session {} unavailable, treating as new conversation: {:#}",
                    session_id,
                    err
                );
                Vec::new()
            }
        }
    }

    async fn semantic_search(&self, query: &str) -> (SemanticStatus, Vec<SemanticHit>) {
        let Some(retriever) = self.semantic.as_ref() else {
            return (SemanticStatus::Disabled, Vec::new());
        };
        match tokio::time::timeout(self.semantic_timeout, retriever.search(query, self.semantic_k))
            .await
        {
            Ok(Ok(mut hits)) => {
                hits.truncate(self.semantic_k);
                (SemanticStatus::Ok, hits)
            }
            Ok(Err(err)) => {
                log::warn!("Semantic retriever failed, using lexical results only: {:#}", err);
                (SemanticStatus::Failed, Vec::new())
            }
            Err(_) => {
                log::warn!(
                    "Semantic retriever timed out after {:?}, using lexical results only",
                    self.semantic_timeout
                );
                (SemanticStatus::TimedOut, Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_lexical::LexicalConfig;

    fn engine(docs: Vec<Document>) -> RetrievalEngine {
        let handle = LexicalIndexHandle::with_documents(LexicalConfig::default(), docs).unwrap();
        RetrievalEngine::new(&RetrievalConfig::default(), Arc::new(handle)).unwrap()
    }

    #[tokio::test]
    async fn empty_query_returns_empty_outcome() {
        let engine = engine(vec![Document::new("a", "anything at all")]);
        let outcome = engine.retrieve("   ", &[]).await;
        assert!(outcome.documents.is_empty());
        assert_eq!(outcome.diagnostics.lexical_hits, 0);
    }

    #[tokio::test]
    async fn no_semantic_retriever_is_lexical_only() {
        let engine = engine(vec![
            Document::new("a", "invoice payment failed"),
            Document::new("b", "team calendar"),
        ]);
        let outcome = engine.retrieve("invoice payment", &[]).await;
        assert_eq!(outcome.ids(), vec!["a"]);
        assert_eq!(outcome.diagnostics.semantic, SemanticStatus::Disabled);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = RetrievalConfig::default();
        config.packing.token_budget = 0;
        let handle = Arc::new(LexicalIndexHandle::new(LexicalConfig::default()).unwrap());
        assert!(RetrievalEngine::new(&config, handle).is_err());
    }
}
