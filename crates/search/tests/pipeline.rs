use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use context_lexical::{
    LexicalConfig, LexicalIndex, LexicalIndexHandle, RefreshOutcome, Tokenizer,
};
use context_protocol::{
    AnswerGenerator, ChatHistoryStore, ConversationTurn, Document, InMemoryCorpus, InMemoryHistory,
    SemanticHit, SemanticRetriever, TopicDecision,
};
use context_search::{
    PhraseConfig, RetrievalConfig, RetrievalEngine, SemanticStatus, TopicStrategy, VerdictSource,
};
use pretty_assertions::assert_eq;

fn support_corpus() -> Vec<Document> {
    vec![
        Document::new("d1", "Error code E1042 means the card was declined by the issuer"),
        Document::new("d2", "Payments can fail when the bank rejects a charge"),
        Document::new("d3", "Office hours are nine to five on weekdays"),
    ]
}

fn handle(docs: Vec<Document>) -> Arc<LexicalIndexHandle> {
    Arc::new(LexicalIndexHandle::with_documents(LexicalConfig::default(), docs).unwrap())
}

fn doc_by_id(docs: &[Document], id: &str) -> Arc<Document> {
    Arc::new(docs.iter().find(|d| d.id == id).unwrap().clone())
}

/// Returns a fixed ranking regardless of the query.
struct FixedSemantic(Vec<SemanticHit>);

#[async_trait]
impl SemanticRetriever for FixedSemantic {
    async fn search(&self, _query: &str, k: usize) -> anyhow::Result<Vec<SemanticHit>> {
        Ok(self.0.iter().take(k).cloned().collect())
    }
}

struct FailingSemantic;

#[async_trait]
impl SemanticRetriever for FailingSemantic {
    async fn search(&self, _query: &str, _k: usize) -> anyhow::Result<Vec<SemanticHit>> {
        Err(anyhow!("vector store unreachable"))
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Never answers within the test; records when its future is polled and dropped.
struct HangingSemantic {
    started: Arc<AtomicBool>,
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl SemanticRetriever for HangingSemantic {
    async fn search(&self, _query: &str, _k: usize) -> anyhow::Result<Vec<SemanticHit>> {
        let _guard = DropFlag(Arc::clone(&self.dropped));
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

/// Swaps a new document into the lexical index the moment it is called.
struct SwappingSemantic {
    lexical: Arc<LexicalIndexHandle>,
}

#[async_trait]
impl SemanticRetriever for SwappingSemantic {
    async fn search(&self, _query: &str, _k: usize) -> anyhow::Result<Vec<SemanticHit>> {
        let config = self.lexical.config();
        let index = LexicalIndex::build(
            vec![Document::new("late", "card declined at checkout")],
            Tokenizer::new(config.tokenizer.clone()),
            config.bm25,
        );
        self.lexical.replace(index);
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn semantic_call_starts_before_lexical_scoring() {
    let lexical = handle(support_corpus());
    let engine = RetrievalEngine::new(&RetrievalConfig::default(), Arc::clone(&lexical))
        .unwrap()
        .with_semantic(Arc::new(SwappingSemantic {
            lexical: Arc::clone(&lexical),
        }));

    let outcome = engine.retrieve("card declined", &[]).await;
    assert_eq!(outcome.ids(), vec!["late"]);
}

#[tokio::test]
async fn lexical_and_semantic_winners_tie_and_break_by_id() {
    let docs = support_corpus();
    let semantic = FixedSemantic(vec![
        SemanticHit::new(doc_by_id(&docs, "d2"), 1),
        SemanticHit::new(doc_by_id(&docs, "d3"), 2),
    ]);
    let engine = RetrievalEngine::new(&RetrievalConfig::default(), handle(docs))
        .unwrap()
        .with_semantic(Arc::new(semantic));

    let outcome = engine.retrieve("E1042 declined", &[]).await;

    assert_eq!(outcome.ids(), vec!["d1", "d2", "d3"]);
    assert_eq!(outcome.diagnostics.lexical_hits, 1);
    assert_eq!(outcome.diagnostics.semantic, SemanticStatus::Ok);
    assert_eq!(outcome.diagnostics.fused_candidates, 3);
    assert_eq!(outcome.topic.source, VerdictSource::NoHistory);
}

#[tokio::test]
async fn failing_semantic_retriever_degrades_to_lexical() {
    let engine = RetrievalEngine::new(&RetrievalConfig::default(), handle(support_corpus()))
        .unwrap()
        .with_semantic(Arc::new(FailingSemantic));

    let outcome = engine.retrieve("card declined", &[]).await;
    assert_eq!(outcome.ids(), vec!["d1"]);
    assert_eq!(outcome.diagnostics.semantic, SemanticStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn semantic_timeout_degrades_to_lexical() {
    let started = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicBool::new(false));
    let engine = RetrievalEngine::new(&RetrievalConfig::default(), handle(support_corpus()))
        .unwrap()
        .with_semantic(Arc::new(HangingSemantic {
            started: Arc::clone(&started),
            dropped: Arc::clone(&dropped),
        }));

    let outcome = engine.retrieve("card declined", &[]).await;
    assert_eq!(outcome.ids(), vec!["d1"]);
    assert_eq!(outcome.diagnostics.semantic, SemanticStatus::TimedOut);
    assert!(started.load(Ordering::SeqCst));
    assert!(dropped.load(Ordering::SeqCst), "timed-out call must be dropped");
}

#[tokio::test(start_paused = true)]
async fn dropping_the_request_cancels_the_semantic_call() {
    let mut config = RetrievalConfig::default();
    config.semantic.timeout_ms = 600_000;
    let started = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicBool::new(false));
    let engine = RetrievalEngine::new(&config, handle(support_corpus()))
        .unwrap()
        .with_semantic(Arc::new(HangingSemantic {
            started: Arc::clone(&started),
            dropped: Arc::clone(&dropped),
        }));

    let result =
        tokio::time::timeout(Duration::from_millis(50), engine.retrieve("card declined", &[]))
            .await;

    assert!(result.is_err());
    assert!(started.load(Ordering::SeqCst));
    assert!(dropped.load(Ordering::SeqCst));
}

fn kubernetes_history() -> Vec<ConversationTurn> {
    vec![ConversationTurn::new(
        "How does Kubernetes autoscaling work?",
        "The horizontal pod autoscaler adds replicas when CPU crosses the target. \
         Scale-down waits five minutes.",
    )]
}

#[tokio::test]
async fn follow_up_query_is_expanded_with_history() {
    let docs = vec![
        Document::new("hpa", "horizontal pod autoscaler tuning and cpu targets"),
        Document::new("billing", "invoices are sent monthly"),
    ];
    let engine = RetrievalEngine::new(&RetrievalConfig::default(), handle(docs)).unwrap();

    let outcome = engine
        .retrieve("How do I disable it?", &kubernetes_history())
        .await;

    assert_eq!(outcome.topic.decision, TopicDecision::Continue);
    assert_eq!(outcome.topic.source, VerdictSource::Strategy);
    assert!(outcome.retrieval_query.starts_with("How do I disable it?\n"));
    assert!(outcome.retrieval_query.contains("autoscaler"));
    assert_eq!(outcome.ids(), vec!["hpa"]);
}

#[tokio::test]
async fn unrelated_question_starts_a_new_topic() {
    let docs = vec![
        Document::new("hpa", "horizontal pod autoscaler tuning"),
        Document::new("refunds", "Stripe refund policy for invoices"),
    ];
    let engine = RetrievalEngine::new(&RetrievalConfig::default(), handle(docs)).unwrap();

    let outcome = engine
        .retrieve("What is the refund policy for Stripe invoices?", &kubernetes_history())
        .await;

    assert_eq!(outcome.topic.decision, TopicDecision::NewTopic);
    assert_eq!(
        outcome.retrieval_query,
        "What is the refund policy for Stripe invoices?"
    );
    assert_eq!(outcome.ids(), vec!["refunds"]);
}

struct BrokenStrategy;

#[async_trait]
impl TopicStrategy for BrokenStrategy {
    fn name(&self) -> &str {
        "broken"
    }

    async fn decide(&self, _: &str, _: &[ConversationTurn]) -> anyhow::Result<TopicDecision> {
        Err(anyhow!("classifier model returned garbage"))
    }
}

#[tokio::test]
async fn classifier_failure_fails_open_to_continue() {
    let config = RetrievalConfig::default();
    let engine = RetrievalEngine::new(&config, handle(support_corpus()))
        .unwrap()
        .with_topic_strategy(Arc::new(BrokenStrategy), &config);

    let outcome = engine
        .retrieve("What is the refund policy?", &kubernetes_history())
        .await;

    assert_eq!(outcome.topic.decision, TopicDecision::Continue);
    assert_eq!(outcome.topic.source, VerdictSource::FailOpenError);
    assert!(outcome.retrieval_query.contains("Kubernetes"));
}

#[tokio::test]
async fn technical_phrase_promotes_matching_document() {
    let mut config = RetrievalConfig::default();
    config.boost.enabled = true;
    config.boost.phrases = vec![PhraseConfig::new("rate limit")];
    config.semantic.enabled = false;

    let docs = vec![
        Document::new("a-general", "request limit request rate request retries"),
        Document::new(
            "b-exact",
            "the rate limit applies per request to each client account",
        ),
    ];
    let engine = RetrievalEngine::new(&config, handle(docs.clone())).unwrap();
    let plain = RetrievalEngine::new(&RetrievalConfig::default(), handle(docs)).unwrap();

    let unboosted = plain.retrieve("request rate limit", &[]).await;
    let boosted = engine.retrieve("request rate limit", &[]).await;

    assert_eq!(unboosted.ids(), vec!["a-general", "b-exact"]);
    assert_eq!(boosted.ids(), vec!["b-exact", "a-general"]);
    assert_eq!(boosted.diagnostics.technical_phrases, vec!["rate limit".to_string()]);
}

#[tokio::test]
async fn empty_index_and_no_semantic_yield_empty_context() {
    let engine = RetrievalEngine::new(&RetrievalConfig::default(), handle(Vec::new())).unwrap();
    let outcome = engine.retrieve("anything", &[]).await;
    assert!(outcome.documents.is_empty());
    assert_eq!(outcome.diagnostics.total_tokens, 0);
}

#[tokio::test]
async fn refresh_index_picks_up_corpus_changes() {
    let corpus = InMemoryCorpus::new(vec![Document::new("old", "legacy billing portal")]);
    let lexical = Arc::new(LexicalIndexHandle::new(LexicalConfig::default()).unwrap());
    let engine = RetrievalEngine::new(&RetrievalConfig::default(), lexical).unwrap();

    assert!(matches!(
        engine.refresh_index(&corpus).await,
        Some(RefreshOutcome::Rebuilt { documents: 1, .. })
    ));
    assert_eq!(engine.retrieve("billing portal", &[]).await.ids(), vec!["old"]);

    corpus.replace(vec![Document::new("new", "new billing portal")]);
    engine.refresh_index(&corpus).await;
    assert_eq!(engine.retrieve("billing portal", &[]).await.ids(), vec!["new"]);
}

/// Echoes the ids it was given so tests can see what reached generation.
#[derive(Default)]
struct RecordingGenerator {
    seen_query: Mutex<Option<String>>,
}

#[async_trait]
impl AnswerGenerator for RecordingGenerator {
    async fn generate(&self, query: &str, documents: &[Arc<Document>]) -> anyhow::Result<String> {
        *self.seen_query.lock().unwrap() = Some(query.to_string());
        let ids: Vec<&str> = documents.iter().map(|d| d.id.as_str()).collect();
        Ok(format!("answered from {}", ids.join(",")))
    }
}

#[tokio::test]
async fn respond_runs_history_retrieval_and_generation() {
    let history = InMemoryHistory::new();
    for turn in kubernetes_history() {
        history.append("s-1", turn);
    }
    let docs = vec![Document::new("hpa", "autoscaler scale-down delay settings")];
    let engine = RetrievalEngine::new(&RetrievalConfig::default(), handle(docs)).unwrap();
    let generator = RecordingGenerator::default();

    let response = engine
        .respond(&history, &generator, "s-1", "Can I shorten that scale-down wait?")
        .await
        .unwrap();

    assert_eq!(response.answer, "answered from hpa");
    assert_eq!(response.outcome.topic.decision, TopicDecision::Continue);
    let seen = generator.seen_query.lock().unwrap().clone().unwrap();
    assert!(seen.contains("Kubernetes"));
}

struct UnavailableHistory;

#[async_trait]
impl ChatHistoryStore for UnavailableHistory {
    async fn get_recent_turns(
        &self,
        _session_id: &str,
        _limit: usize,
    ) -> anyhow::Result<Vec<ConversationTurn>> {
        Err(anyhow!("history database down"))
    }
}

#[tokio::test]
async fn unavailable_history_is_treated_as_empty() {
    let engine =
        RetrievalEngine::new(&RetrievalConfig::default(), handle(support_corpus())).unwrap();
    let generator = RecordingGenerator::default();

    let response = engine
        .respond(&UnavailableHistory, &generator, "s-9", "card declined")
        .await
        .unwrap();

    assert_eq!(response.outcome.topic.source, VerdictSource::NoHistory);
    assert_eq!(response.answer, "answered from d1");
}
