use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use context_lexical::LexicalHit;
use context_protocol::{Document, SemanticHit};
use serde::Serialize;

/// A document after fusion, carrying its per-list ranks and scores.
#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    pub document: Arc<Document>,
    pub lexical_rank: Option<usize>,
    pub semantic_rank: Option<usize>,
    pub fusion_score: f64,
    pub boost_score: f64,
}

impl RankedCandidate {
    pub fn id(&self) -> &str {
        &self.document.id
    }

    pub fn final_score(&self) -> f64 {
        self.fusion_score + self.boost_score
    }

    /// Best rank across both lists
    pub fn best_rank(&self) -> usize {
        match (self.lexical_rank, self.semantic_rank) {
            (Some(l), Some(s)) => l.min(s),
            (Some(r), None) | (None, Some(r)) => r,
            (None, None) => usize::MAX,
        }
    }
}

/// Order by fused score, then best individual rank, then id.
pub(crate) fn fusion_order(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.fusion_score
        .total_cmp(&a.fusion_score)
        .then_with(|| a.best_rank().cmp(&b.best_rank()))
        .then_with(|| a.id().cmp(b.id()))
}

/// Order by final (fused + boost) score, falling back to [`fusion_order`].
pub(crate) fn final_order(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.final_score()
        .total_cmp(&a.final_score())
        .then_with(|| fusion_order(a, b))
}

/// Reciprocal Rank Fusion of the lexical and semantic rankings
///
/// RRF formula: score(d) = Σ 1 / (k + rank_i(d)), over the lists containing d
#[derive(Debug, Clone, Copy)]
pub struct RrfFusion {
    k: f64,
}

impl RrfFusion {
    pub fn new(k: f64) -> Self {
        Self { k }
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    pub fn contribution(&self, rank: usize) -> f64 {
        1.0 / (self.k + rank.max(1) as f64)
    }

    /// Fuse both rankings into one deduplicated list sorted by fused score.
    ///
    /// A document listed twice in the same ranking keeps its best rank.
    /// Ranks are 1-based; a rank of 0 is treated as 1.
    pub fn fuse(&self, lexical: &[LexicalHit], semantic: &[SemanticHit]) -> Vec<RankedCandidate> {
        let mut by_id: HashMap<&str, RankedCandidate> =
            HashMap::with_capacity(lexical.len() + semantic.len());

        for hit in lexical {
            let rank = hit.rank.max(1);
            let entry = by_id
                .entry(hit.document.id.as_str())
                .or_insert_with(|| empty_candidate(&hit.document));
            entry.lexical_rank = Some(entry.lexical_rank.map_or(rank, |r| r.min(rank)));
        }
        for hit in semantic {
            let rank = hit.rank.max(1);
            let entry = by_id
                .entry(hit.document.id.as_str())
                .or_insert_with(|| empty_candidate(&hit.document));
            entry.semantic_rank = Some(entry.semantic_rank.map_or(rank, |r| r.min(rank)));
        }

        let mut fused: Vec<RankedCandidate> = by_id
            .into_values()
            .map(|mut candidate| {
                let lexical = candidate.lexical_rank.map_or(0.0, |r| self.contribution(r));
                let semantic = candidate.semantic_rank.map_or(0.0, |r| self.contribution(r));
                candidate.fusion_score = lexical + semantic;
                candidate
            })
            .collect();
        fused.sort_by(fusion_order);

        log::debug!(
            "RRF fused {} lexical + {} semantic hits into {} candidates",
            lexical.len(),
            semantic.len(),
            fused.len()
        );
        fused
    }
}

impl Default for RrfFusion {
    fn default() -> Self {
        Self::new(60.0)
    }
}

fn empty_candidate(document: &Arc<Document>) -> RankedCandidate {
    RankedCandidate {
        document: Arc::clone(document),
        lexical_rank: None,
        semantic_rank: None,
        fusion_score: 0.0,
        boost_score: 0.0,
    }
}
