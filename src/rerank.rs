//! Cross-encoder reranking of fused candidates.
//!
//! ```text
//! query → [hybrid retriever] → fused candidates → [cross-encoder] → top N
//! ```
//!
//! The cross-encoder scores each (query, document content) pair jointly; the
//! candidates are re-sorted by that score and truncated. Document content is
//! never modified.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::RerankConfig;
use crate::models::RetrievedCandidate;
use crate::retrieval::Retriever;

/// Relevance scoring capability: one score per document, higher is better.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;
}

pub struct Reranker {
    encoder: Arc<dyn CrossEncoder>,
    top_n: usize,
}

impl Reranker {
    pub fn new(encoder: Arc<dyn CrossEncoder>, top_n: usize) -> Self {
        Self { encoder, top_n }
    }

    /// Re-score `candidates` against `query` and keep the best `top_n`.
    ///
    /// `contents` is the corpus document list the candidates index into.
    /// Empty input returns empty output without calling the model.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: &[RetrievedCandidate],
        contents: &[String],
    ) -> Result<Vec<RetrievedCandidate>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let documents = candidates
            .iter()
            .map(|c| {
                contents
                    .get(c.doc)
                    .cloned()
                    .with_context(|| format!("candidate {} is outside the corpus", c.doc))
            })
            .collect::<Result<Vec<String>>>()?;

        let scores = self.encoder.score(query, &documents).await?;
        if scores.len() != candidates.len() {
            bail!(
                "Cross-encoder returned {} scores for {} documents",
                scores.len(),
                candidates.len()
            );
        }

        let mut reranked: Vec<RetrievedCandidate> = candidates
            .iter()
            .zip(scores)
            .map(|(c, s)| RetrievedCandidate {
                doc: c.doc,
                score: s as f64,
            })
            .collect();
        reranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        reranked.truncate(self.top_n);
        debug!(kept = reranked.len(), of = candidates.len(), "reranked");
        Ok(reranked)
    }
}

/// A base retriever whose output is reranked before being returned.
pub struct RerankedRetriever {
    base: Box<dyn Retriever>,
    reranker: Reranker,
    contents: Vec<String>,
}

impl RerankedRetriever {
    pub fn new(base: Box<dyn Retriever>, reranker: Reranker, contents: Vec<String>) -> Self {
        Self {
            base,
            reranker,
            contents,
        }
    }
}

#[async_trait]
impl Retriever for RerankedRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedCandidate>> {
        let candidates = self.base.retrieve(query).await?;
        self.reranker
            .rerank(query, &candidates, &self.contents)
            .await
            .context("reranking failed")
    }
}

// ============ HTTP provider ============

/// Cross-encoder served over HTTP in the text-embeddings-inference style:
/// `POST {url}/rerank {"query", "texts"}` → `[{"index", "score"}]`.
pub struct HttpCrossEncoder {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

impl HttpCrossEncoder {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/rerank", self.url))
            .json(&json!({ "query": query, "texts": documents }))
            .send()
            .await
            .context("Rerank request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Rerank API error {}: {}", status, body);
        }

        let hits: Vec<RerankHit> = response.json().await.context("Invalid rerank response")?;
        scores_by_index(hits, documents.len())
    }
}

/// Place each hit's score at its document index.
fn scores_by_index(hits: Vec<RerankHit>, len: usize) -> Result<Vec<f32>> {
    let mut scores = vec![None; len];
    for hit in hits {
        match scores.get_mut(hit.index) {
            Some(slot) => *slot = Some(hit.score),
            None => bail!("Rerank response index {} out of range", hit.index),
        }
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.with_context(|| format!("Rerank response missing index {}", i)))
        .collect()
}

// ============ Local provider (fastembed) ============

/// In-process cross-encoder via fastembed's `TextRerank`.
#[cfg(feature = "local-models")]
pub struct LocalCrossEncoder {
    model: Arc<std::sync::Mutex<fastembed::TextRerank>>,
}

#[cfg(feature = "local-models")]
impl LocalCrossEncoder {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let model = match config.model.as_str() {
            "BAAI/bge-reranker-base" | "bge-reranker-base" => {
                fastembed::RerankerModel::BGERerankerBase
            }
            "jinaai/jina-reranker-v1-turbo-en" | "jina-reranker-v1-turbo-en" => {
                fastembed::RerankerModel::JINARerankerV1TurboEn
            }
            other => bail!(
                "Unknown local rerank model: '{}'. Supported models: bge-reranker-base, \
                 jina-reranker-v1-turbo-en",
                other
            ),
        };
        let reranker = fastembed::TextRerank::try_new(
            fastembed::RerankInitOptions::new(model).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local rerank model: {}", e))?;
        Ok(Self {
            model: Arc::new(std::sync::Mutex::new(reranker)),
        })
    }
}

#[cfg(feature = "local-models")]
#[async_trait]
impl CrossEncoder for LocalCrossEncoder {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let model = Arc::clone(&self.model);
        let query = query.to_string();
        let documents = documents.to_vec();
        let len = documents.len();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("local rerank model lock poisoned"))?;
            let docs: Vec<&str> = documents.iter().map(String::as_str).collect();
            let results = model
                .rerank(query.as_str(), docs, false, None)
                .map_err(|e| anyhow::anyhow!("Local rerank failed: {}", e))?;
            let hits = results
                .into_iter()
                .map(|r| RerankHit {
                    index: r.index,
                    score: r.score,
                })
                .collect();
            scores_by_index(hits, len)
        })
        .await?
    }
}

/// Create the [`CrossEncoder`] named by `config.provider` (`http` or `local`).
pub fn create_cross_encoder(config: &RerankConfig) -> Result<Arc<dyn CrossEncoder>> {
    match config.provider.as_str() {
        "http" => Ok(Arc::new(HttpCrossEncoder::new(config)?)),
        #[cfg(feature = "local-models")]
        "local" => Ok(Arc::new(LocalCrossEncoder::new(config)?)),
        #[cfg(not(feature = "local-models"))]
        "local" => bail!("Local rerank provider requires --features local-models"),
        other => bail!("Unknown rerank provider: {}", other),
    }
}
