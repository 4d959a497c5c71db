use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use context_protocol::{Document, SemanticHit, SemanticRetriever};
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    k: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Vec<WireHit>,
}

#[derive(Debug, Deserialize)]
struct WireHit {
    #[serde(flatten)]
    document: Document,
    /// Missing ranks fall back to response order
    #[serde(default)]
    rank: Option<usize>,
}

/// Semantic retriever reached over HTTP.
///
/// POSTs `{"query": ..., "k": ...}` to the endpoint and expects
/// `{"hits": [{"id", "content", "metadata"?, "rank"?}, ...]}`.
/// Deadlines are enforced by the engine, which drops the request on timeout.
#[derive(Debug, Clone)]
pub struct HttpSemanticRetriever {
    client: Client,
    endpoint: String,
}

impl HttpSemanticRetriever {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl SemanticRetriever for HttpSemanticRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SemanticHit>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SearchRequest { query, k })
            .send()
            .await
            .with_context(|| format!("Semantic request to {} failed", self.endpoint))?
            .error_for_status()
            .context("Semantic retriever returned an error status")?;
        let body: SearchResponse = response
            .json()
            .await
            .context("Semantic retriever returned malformed JSON")?;
        Ok(into_hits(body.hits, k))
    }
}

fn into_hits(hits: Vec<WireHit>, k: usize) -> Vec<SemanticHit> {
    let mut ranked: Vec<(usize, Document)> = hits
        .into_iter()
        .enumerate()
        .map(|(pos, hit)| (hit.rank.unwrap_or(pos + 1), hit.document))
        .collect();
    ranked.sort_by_key(|(rank, _)| *rank);
    ranked
        .into_iter()
        .take(k)
        .map(|(rank, document)| SemanticHit::new(document, rank))
        .collect()
}
