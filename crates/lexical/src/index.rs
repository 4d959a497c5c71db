use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use context_protocol::Document;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LexicalError, Result};
use crate::tokenizer::Tokenizer;

/// BM25 constants: `k1` saturates term frequency, `b` scales length normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

impl Bm25Params {
    pub fn validate(&self) -> Result<()> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(LexicalError::InvalidParams(format!(
                "k1 must be a finite value >= 0 (got {})",
                self.k1
            )));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(LexicalError::InvalidParams(format!(
                "b must be in [0.0, 1.0] (got {})",
                self.b
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    doc: u32,
    tf: u32,
}

/// A keyword match with its BM25 score and 1-based rank.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub document: Arc<Document>,
    pub score: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub terms: usize,
    pub postings: usize,
    pub avg_doc_len: f64,
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    pub built_at_unix_ms: u64,
}

/// Immutable inverted index over one corpus snapshot.
///
/// Never mutated after [`build`](LexicalIndex::build); a rebuild produces a
/// new value that replaces this one wholesale.
#[derive(Debug)]
pub struct LexicalIndex {
    documents: Vec<Arc<Document>>,
    doc_lengths: Vec<u32>,
    postings: HashMap<String, Vec<Posting>>,
    avg_len: f64,
    params: Bm25Params,
    tokenizer: Tokenizer,
    revision: Option<String>,
    fingerprint: String,
    built_at: Instant,
    built_at_system: SystemTime,
}

impl LexicalIndex {
    pub fn empty(tokenizer: Tokenizer, params: Bm25Params) -> Self {
        Self::build(Vec::new(), tokenizer, params)
    }

    /// Index `documents`. A repeated id keeps the last occurrence.
    pub fn build(
        documents: impl IntoIterator<Item = Document>,
        tokenizer: Tokenizer,
        params: Bm25Params,
    ) -> Self {
        let mut by_id: BTreeMap<String, Document> = BTreeMap::new();
        for doc in documents {
            by_id.insert(doc.id.clone(), doc);
        }

        let mut hasher = Sha256::new();
        let mut stored = Vec::with_capacity(by_id.len());
        let mut doc_lengths = Vec::with_capacity(by_id.len());
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut total_len = 0u64;

        for (ordinal, doc) in by_id.into_values().enumerate() {
            hasher.update(doc.id.as_bytes());
            hasher.update([0u8]);
            hasher.update(doc.content.as_bytes());
            hasher.update([0u8]);

            let tokens = tokenizer.tokenize(&doc.content);
            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *tf.entry(token.clone()).or_insert(0) += 1;
            }
            for (term, count) in tf {
                postings.entry(term).or_default().push(Posting {
                    doc: ordinal as u32,
                    tf: count,
                });
            }

            total_len += tokens.len() as u64;
            doc_lengths.push(tokens.len() as u32);
            stored.push(Arc::new(doc));
        }

        let avg_len = if stored.is_empty() {
            0.0
        } else {
            total_len as f64 / stored.len() as f64
        };

        Self {
            documents: stored,
            doc_lengths,
            postings,
            avg_len,
            params,
            tokenizer,
            revision: None,
            fingerprint: format!("{:x}", hasher.finalize()),
            built_at: Instant::now(),
            built_at_system: SystemTime::now(),
        }
    }

    /// Tag the snapshot with the corpus revision it was built from.
    #[must_use]
    pub fn with_revision(mut self, revision: Option<String>) -> Self {
        self.revision = revision;
        self
    }

    /// Top `k` documents for `query`, best first, ties broken by id.
    pub fn search(&self, query: &str, k: usize) -> Vec<LexicalHit> {
        if k == 0 || self.documents.is_empty() {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let terms: Vec<String> = self
            .tokenizer
            .tokenize(query)
            .into_iter()
            .filter(|term| seen.insert(term.clone()))
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let total_docs = self.documents.len() as f64;
        let avg_len = self.avg_len.max(1e-9);
        let Bm25Params { k1, b } = self.params;
        let mut scores: HashMap<u32, f64> = HashMap::new();

        for term in &terms {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let idf = bm25_idf(total_docs, list.len() as f64);
            for posting in list {
                let tf = f64::from(posting.tf);
                let dl = f64::from(self.doc_lengths[posting.doc as usize]);
                let denom = tf + k1 * (1.0 - b + b * dl / avg_len);
                if denom > 0.0 {
                    *scores.entry(posting.doc).or_insert(0.0) += idf * tf * (k1 + 1.0) / denom;
                }
            }
        }

        let mut ranked: Vec<(u32, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.total_cmp(&a.1).then_with(|| {
                self.documents[a.0 as usize]
                    .id
                    .cmp(&self.documents[b.0 as usize].id)
            })
        });
        ranked.truncate(k);

        ranked
            .into_iter()
            .enumerate()
            .map(|(pos, (doc, score))| LexicalHit {
                document: Arc::clone(&self.documents[doc as usize]),
                score,
                rank: pos + 1,
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Document>> {
        self.documents
            .binary_search_by(|doc| doc.id.as_str().cmp(id))
            .ok()
            .map(|pos| &self.documents[pos])
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn built_at(&self) -> Instant {
        self.built_at
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            documents: self.documents.len(),
            terms: self.postings.len(),
            postings: self.postings.values().map(Vec::len).sum(),
            avg_doc_len: self.avg_len,
            fingerprint: self.fingerprint.clone(),
            revision: self.revision.clone(),
            built_at_unix_ms: self
                .built_at_system
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        }
    }
}

fn bm25_idf(total_docs: f64, df: f64) -> f64 {
    ((total_docs - df + 0.5) / (df + 0.5) + 1.0).ln()
}

impl PartialEq for LexicalHit {
    fn eq(&self, other: &Self) -> bool {
        self.document.id == other.document.id
            && self.rank == other.rank
            && self.score.total_cmp(&other.score) == Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::TokenizerConfig;
    use pretty_assertions::assert_eq;

    fn index(docs: &[(&str, &str)]) -> LexicalIndex {
        LexicalIndex::build(
            docs.iter().map(|(id, content)| Document::new(*id, *content)),
            Tokenizer::default(),
            Bm25Params::default(),
        )
    }

    fn ids(hits: &[LexicalHit]) -> Vec<&str> {
        hits.iter().map(|h| h.document.id.as_str()).collect()
    }

    #[test]
    fn empty_corpus_returns_no_hits() {
        let index = LexicalIndex::empty(Tokenizer::default(), Bm25Params::default());
        assert!(index.is_empty());
        assert!(index.search("anything at all", 10).is_empty());
    }

    #[test]
    fn rare_terms_outrank_common_terms() {
        let index = index(&[
            ("a", "invoice payment failed"),
            ("b", "invoice payment succeeded"),
            ("c", "invoice error E1042 payment"),
        ]);
        let hits = index.search("invoice E1042", 3);
        assert_eq!(ids(&hits)[0], "c");
        assert_eq!(hits[0].rank, 1);
    }

    #[test]
    fn long_documents_are_penalized() {
        let filler = "lorem ipsum dolor sit amet ".repeat(40);
        let long = format!("webhook retries {filler}");
        let index = index(&[("long", long.as_str()), ("short", "webhook retries")]);
        assert_eq!(ids(&index.search("webhook", 2)), vec!["short", "long"]);
    }

    #[test]
    fn term_frequency_saturates() {
        let index = index(&[
            ("one", "quota quota other words here"),
            ("many", "quota quota quota quota quota quota quota quota"),
            ("none", "unrelated text"),
        ]);
        let hits = index.search("quota", 2);
        let ratio = hits[0].score / hits[1].score;
        assert!(ratio < 4.0, "tf should saturate, ratio={ratio}");
    }

    #[test]
    fn ties_are_broken_by_document_id() {
        let index = index(&[("zeta", "shared term"), ("alpha", "shared term"), ("mid", "shared term")]);
        assert_eq!(ids(&index.search("shared", 3)), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn results_are_truncated_to_k() {
        let index = index(&[("a", "alpha"), ("b", "alpha"), ("c", "alpha")]);
        assert_eq!(index.search("alpha", 2).len(), 2);
        assert!(index.search("alpha", 0).is_empty());
    }

    #[test]
    fn repeated_id_keeps_last_content() {
        let index = index(&[("a", "old wording"), ("a", "fresh wording")]);
        assert_eq!(index.len(), 1);
        assert!(index.search("old", 5).is_empty());
        assert_eq!(ids(&index.search("fresh", 5)), vec!["a"]);
    }

    #[test]
    fn stopword_only_query_matches_nothing() {
        let index = index(&[("a", "the quick brown fox")]);
        assert!(index.search("the and of", 5).is_empty());
    }

    #[test]
    fn build_is_deterministic() {
        let docs = [("b", "beta gamma"), ("a", "alpha beta"), ("c", "gamma delta")];
        let first = index(&docs);
        let mut reversed = docs;
        reversed.reverse();
        let second = index(&reversed);

        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.search("beta gamma", 3), second.search("beta gamma", 3));
    }

    #[test]
    fn stats_report_vocabulary() {
        let index = LexicalIndex::build(
            vec![Document::new("a", "alpha beta"), Document::new("b", "beta")],
            Tokenizer::new(TokenizerConfig::default()),
            Bm25Params::default(),
        )
        .with_revision(Some("r1".to_string()));
        let stats = index.stats();

        assert_eq!(stats.documents, 2);
        assert_eq!(stats.terms, 2);
        assert_eq!(stats.postings, 3);
        assert_eq!(stats.revision.as_deref(), Some("r1"));
        assert!(index.get("b").is_some());
        assert!(index.get("zzz").is_none());
    }

    #[test]
    fn invalid_params_are_rejected() {
        assert!(Bm25Params { k1: -1.0, b: 0.5 }.validate().is_err());
        assert!(Bm25Params { k1: 1.2, b: 1.5 }.validate().is_err());
        assert!(Bm25Params::default().validate().is_ok());
    }
}
