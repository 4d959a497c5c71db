//! # Context Search
//!
//! Hybrid retrieval and context assembly on top of the lexical index and an
//! external semantic retriever.
//!
//! ## Pipeline
//!
//! ```text
//! query + recent turns
//!     │
//!     ├──> TopicClassifier (CONTINUE / NEW_TOPIC, fail-open)
//!     ├──> QueryExpander   (fold condensed history into follow-ups)
//!     │
//!     ├──> LexicalIndex  ─┐
//!     │                   ├─> RrfFusion ──> TermBooster ──> ContextPacker
//!     └──> SemanticRetriever (timeout → lexical only)
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use context_lexical::{LexicalConfig, LexicalIndexHandle};
//! use context_protocol::Document;
//! use context_search::{RetrievalConfig, RetrievalEngine};
//!
//! # tokio_test_block(async {
//! let handle = LexicalIndexHandle::with_documents(
//!     LexicalConfig::default(),
//!     vec![Document::new("kb-7", "Refunds are issued within 5 business days")],
//! )?;
//! let engine = RetrievalEngine::new(&RetrievalConfig::default(), Arc::new(handle))?;
//!
//! let outcome = engine.retrieve("how long do refunds take", &[]).await;
//! assert_eq!(outcome.ids(), vec!["kb-7"]);
//! # Ok::<(), context_search::SearchError>(())
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

mod boost;
mod config;
mod error;
mod expansion;
mod fusion;
mod pack;
mod pipeline;
mod topic;

pub use boost::{TechnicalPhrase, TermBooster, TermMatches};
pub use config::{
    parse_vocabulary, BoostConfig, FusionConfig, LexicalSection, PackingConfig, PhraseConfig,
    RetrievalConfig, SemanticConfig, TopicConfig,
};
pub use error::{Result, SearchError};
pub use expansion::QueryExpander;
pub use fusion::{RankedCandidate, RrfFusion};
pub use pack::{jaccard, ContextPacker, PackStop, PackedContext};
pub use pipeline::{
    RetrievalDiagnostics, RetrievalEngine, RetrievalOutcome, SemanticStatus, TurnResponse,
};
pub use topic::{
    RuleBasedTopicStrategy, TopicClassifier, TopicStrategy, TopicVerdict, VerdictSource,
};
