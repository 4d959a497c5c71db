use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use context_protocol::{CorpusProvider, Document};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as TokioMutex;

use crate::error::{LexicalError, Result};
use crate::index::{Bm25Params, LexicalIndex};
use crate::tokenizer::{Tokenizer, TokenizerConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalConfig {
    #[serde(flatten)]
    pub bm25: Bm25Params,

    #[serde(flatten)]
    pub tokenizer: TokenizerConfig,

    /// Age after which the live snapshot is rebuilt; 0 disables time-based staleness
    pub staleness_secs: u64,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            bm25: Bm25Params::default(),
            tokenizer: TokenizerConfig::default(),
            staleness_secs: 300,
        }
    }
}

impl LexicalConfig {
    pub fn validate(&self) -> Result<()> {
        self.bm25.validate()
    }

    pub fn staleness_window(&self) -> Option<Duration> {
        (self.staleness_secs > 0).then(|| Duration::from_secs(self.staleness_secs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildReason {
    Invalidated,
    StalenessWindowElapsed,
    RevisionChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Fresh,
    Rebuilt {
        reason: RebuildReason,
        documents: usize,
    },
}

/// Owner of the live [`LexicalIndex`] snapshot.
///
/// Readers clone the current `Arc` and keep searching it even while a
/// rebuild swaps in a successor. Rebuilds are serialized so there is a
/// single writer at a time.
pub struct LexicalIndexHandle {
    current: RwLock<Arc<LexicalIndex>>,
    rebuild_gate: TokioMutex<()>,
    invalidated: AtomicBool,
    config: LexicalConfig,
}

impl LexicalIndexHandle {
    /// Handle over an empty snapshot that is due for a rebuild.
    pub fn new(config: LexicalConfig) -> Result<Self> {
        config.validate()?;
        let empty = LexicalIndex::empty(Tokenizer::new(config.tokenizer.clone()), config.bm25);
        Ok(Self {
            current: RwLock::new(Arc::new(empty)),
            rebuild_gate: TokioMutex::new(()),
            invalidated: AtomicBool::new(true),
            config,
        })
    }

    /// Handle built synchronously from an in-hand document set.
    pub fn with_documents(config: LexicalConfig, documents: Vec<Document>) -> Result<Self> {
        let handle = Self::new(config)?;
        handle.replace(handle.build_index(documents, None));
        handle.invalidated.store(false, Ordering::Release);
        Ok(handle)
    }

    pub fn config(&self) -> &LexicalConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Arc<LexicalIndex> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Explicit rebuild trigger; the next refresh rebuilds regardless of age.
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
    }

    /// Atomically swap in a new snapshot.
    ///
    /// Leaves a pending [`invalidate`](Self::invalidate) in place.
    pub fn replace(&self, index: LexicalIndex) {
        let index = Arc::new(index);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = index;
    }

    pub fn rebuild_reason(&self, revision: Option<&str>, now: Instant) -> Option<RebuildReason> {
        if self.invalidated.load(Ordering::Acquire) {
            return Some(RebuildReason::Invalidated);
        }
        let snapshot = self.snapshot();
        if let Some(revision) = revision {
            if snapshot.revision() != Some(revision) {
                return Some(RebuildReason::RevisionChanged);
            }
        }
        if let Some(window) = self.config.staleness_window() {
            if now.saturating_duration_since(snapshot.built_at()) >= window {
                return Some(RebuildReason::StalenessWindowElapsed);
            }
        }
        None
    }

    /// Rebuild if the snapshot is invalidated, stale, or behind the provider's revision.
    ///
    /// On error the previous snapshot stays live.
    pub async fn refresh(&self, provider: &dyn CorpusProvider) -> Result<RefreshOutcome> {
        let revision = provider.revision().await.map_err(LexicalError::provider)?;
        if self
            .rebuild_reason(revision.as_deref(), Instant::now())
            .is_none()
        {
            return Ok(RefreshOutcome::Fresh);
        }

        let _gate = self.rebuild_gate.lock().await;
        // Another writer may have finished while we waited for the gate.
        let Some(reason) = self.rebuild_reason(revision.as_deref(), Instant::now()) else {
            return Ok(RefreshOutcome::Fresh);
        };
        let documents = self.rebuild_locked(provider).await?;
        Ok(RefreshOutcome::Rebuilt { reason, documents })
    }

    /// Unconditional rebuild from the provider's current corpus.
    pub async fn rebuild(&self, provider: &dyn CorpusProvider) -> Result<usize> {
        let _gate = self.rebuild_gate.lock().await;
        self.rebuild_locked(provider).await
    }

    async fn rebuild_locked(&self, provider: &dyn CorpusProvider) -> Result<usize> {
        let started = Instant::now();
        // Cleared before reading so a trigger raised mid-build survives the swap.
        let was_invalidated = self.invalidated.swap(false, Ordering::AcqRel);
        let index = match self.load_and_build(provider).await {
            Ok(index) => index,
            Err(err) => {
                if was_invalidated {
                    self.invalidate();
                }
                return Err(err);
            }
        };

        let count = index.len();
        let stats = index.stats();
        self.replace(index);

        log::info!(
            "Lexical index rebuilt: {} documents, {} terms in {:?} (revision={})",
            count,
            stats.terms,
            started.elapsed(),
            stats.revision.as_deref().unwrap_or("-")
        );
        Ok(count)
    }

    async fn load_and_build(&self, provider: &dyn CorpusProvider) -> Result<LexicalIndex> {
        let (documents, revision) = provider.load().await.map_err(LexicalError::provider)?;
        let tokenizer = Tokenizer::new(self.config.tokenizer.clone());
        let params = self.config.bm25;
        tokio::task::spawn_blocking(move || {
            LexicalIndex::build(documents, tokenizer, params).with_revision(revision)
        })
        .await
        .map_err(|err| LexicalError::Build(err.to_string()))
    }

    fn build_index(&self, documents: Vec<Document>, revision: Option<String>) -> LexicalIndex {
        LexicalIndex::build(
            documents,
            Tokenizer::new(self.config.tokenizer.clone()),
            self.config.bm25,
        )
        .with_revision(revision)
    }
}
