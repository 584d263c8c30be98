//! In-memory retrieval indexes built fresh for every corpus.
//!
//! - [`Bm25Index`]: Okapi BM25 over lower-cased whitespace tokens.
//! - [`VectorIndex`]: one embedding per document, brute-force cosine search.
//!
//! # BM25
//!
//! ```text
//! idf(t)      = ln(1 + (N - df(t) + 0.5) / (df(t) + 0.5))
//! score(q, d) = Σ_{t ∈ q} idf(t) · tf(t,d)·(k1 + 1)
//!                                 ───────────────────────────────────
//!                                 tf(t,d) + k1·(1 - b + b·|d| / avgdl)
//! ```
//!
//! with `k1 = 1.5`, `b = 0.75`.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::RetrievalConfig;
use crate::embedding::{cosine_similarity, embed_batched, Embedder};
use crate::models::{EnrichedDocument, RetrievedCandidate};
use crate::retrieval::{HybridRetriever, SemanticRetriever, SyntacticRetriever};

const K1: f64 = 1.5;
const B: f64 = 0.75;

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(|t| t.to_lowercase()).collect()
}

pub struct Bm25Index {
    term_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    doc_freq: HashMap<String, usize>,
    avg_len: f64,
}

impl Bm25Index {
    pub fn build(texts: &[String]) -> Self {
        let mut term_freqs = Vec::with_capacity(texts.len());
        let mut doc_lens = Vec::with_capacity(texts.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for text in texts {
            let tokens = tokenize(text);
            doc_lens.push(tokens.len());
            let mut tf: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }

        let total: usize = doc_lens.iter().sum();
        let avg_len = if doc_lens.is_empty() {
            0.0
        } else {
            total as f64 / doc_lens.len() as f64
        };

        Self {
            term_freqs,
            doc_lens,
            doc_freq,
            avg_len,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.len() as f64;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Score every document against `query`.
    pub fn scores(&self, query: &str) -> Vec<f64> {
        let terms = tokenize(query);
        self.term_freqs
            .iter()
            .zip(&self.doc_lens)
            .map(|(tf, &len)| {
                let norm = if self.avg_len > 0.0 {
                    1.0 - B + B * len as f64 / self.avg_len
                } else {
                    1.0
                };
                terms
                    .iter()
                    .map(|term| {
                        let f = tf.get(term).copied().unwrap_or(0) as f64;
                        if f == 0.0 {
                            0.0
                        } else {
                            self.idf(term) * f * (K1 + 1.0) / (f + K1 * norm)
                        }
                    })
                    .sum()
            })
            .collect()
    }

    /// Top `k` documents with a positive score, best first. Ties keep
    /// document order.
    pub fn search(&self, query: &str, k: usize) -> Vec<RetrievedCandidate> {
        let mut ranked: Vec<RetrievedCandidate> = self
            .scores(query)
            .into_iter()
            .enumerate()
            .filter(|(_, s)| *s > 0.0)
            .map(|(doc, score)| RetrievedCandidate { doc, score })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(k);
        ranked
    }
}

pub struct VectorIndex {
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Embed every text once. An empty corpus never calls the embedder.
    pub async fn build(
        embedder: &dyn Embedder,
        texts: &[String],
        batch_size: usize,
    ) -> Result<Self> {
        if texts.is_empty() {
            return Ok(Self {
                vectors: Vec::new(),
            });
        }
        let vectors = embed_batched(embedder, texts, batch_size).await?;
        Ok(Self { vectors })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Top `k` documents by cosine similarity, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<RetrievedCandidate> {
        let mut ranked: Vec<RetrievedCandidate> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(doc, v)| RetrievedCandidate {
                doc,
                score: cosine_similarity(query, v) as f64,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(k);
        ranked
    }
}

/// Build both indexes over the document contents and wrap them in a
/// [`HybridRetriever`] with the configured weights.
pub async fn build_hybrid_retriever(
    documents: &[EnrichedDocument],
    embedder: Arc<dyn Embedder>,
    config: &RetrievalConfig,
    batch_size: usize,
) -> Result<HybridRetriever> {
    let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();

    let bm25 = Bm25Index::build(&texts);
    let vectors = VectorIndex::build(embedder.as_ref(), &texts, batch_size)
        .await
        .context("Failed to embed documents")?;
    info!(documents = texts.len(), "indexes built");

    Ok(HybridRetriever::new(
        Box::new(SyntacticRetriever::new(bm25, config.syntactic_k)),
        Box::new(SemanticRetriever::new(vectors, embedder, config.semantic_k)),
        config.syntactic_weight,
        config.semantic_weight,
        config.rrf_c,
    ))
}
