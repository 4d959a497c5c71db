//! # Context Lexical
//!
//! In-memory BM25 keyword index over the document corpus.
//!
//! ## Architecture
//!
//! ```text
//! CorpusProvider
//!     │
//!     ├──> Tokenizer (lowercase, split on non-alphanumeric, stopwords)
//!     │
//!     ├──> LexicalIndex (immutable snapshot)
//!     │      ├─> posting lists: term -> [(doc, tf)]
//!     │      └─> doc lengths, avg length, fingerprint
//!     │
//!     └──> LexicalIndexHandle
//!            ├─> staleness window / revision / explicit trigger
//!            └─> atomic Arc swap, single rebuild writer
//! ```
//!
//! ## Example
//!
//! ```
//! use context_lexical::{LexicalConfig, LexicalIndexHandle};
//! use context_protocol::Document;
//!
//! let handle = LexicalIndexHandle::with_documents(
//!     LexicalConfig::default(),
//!     vec![Document::new("kb-1", "Error E1042 means the card was declined")],
//! )?;
//! let hits = handle.snapshot().search("E1042", 5);
//! assert_eq!(hits[0].document.id, "kb-1");
//! # Ok::<(), context_lexical::LexicalError>(())
//! ```

mod error;
mod index;
mod snapshot;
mod tokenizer;

pub use error::{LexicalError, Result};
pub use index::{Bm25Params, IndexStats, LexicalHit, LexicalIndex};
pub use snapshot::{LexicalConfig, LexicalIndexHandle, RebuildReason, RefreshOutcome};
pub use tokenizer::{is_stopword, split_words, Tokenizer, TokenizerConfig, ENGLISH_STOPWORDS};
