//! Retrievers and weighted reciprocal rank fusion.
//!
//! A [`Retriever`] maps a query to scored references into the corpus's
//! document list. The [`HybridRetriever`] runs a syntactic and a semantic
//! retriever and fuses their rankings:
//!
//! ```text
//! fused(d) = Σᵢ wᵢ / (c + rankᵢ(d))      ranks are 1-based
//! ```
//!
//! Documents returned by both retrievers appear once with both contributions
//! summed. Ties keep first-encountered order, syntactic list first.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::embedding::Embedder;
use crate::index::{Bm25Index, VectorIndex};
use crate::models::RetrievedCandidate;

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Ranked candidates, best first.
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedCandidate>>;
}

/// Keyword retriever over a [`Bm25Index`].
pub struct SyntacticRetriever {
    index: Bm25Index,
    k: usize,
}

impl SyntacticRetriever {
    pub fn new(index: Bm25Index, k: usize) -> Self {
        Self { index, k }
    }
}

#[async_trait]
impl Retriever for SyntacticRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedCandidate>> {
        Ok(self.index.search(query, self.k))
    }
}

/// Nearest-neighbour retriever over a [`VectorIndex`].
pub struct SemanticRetriever {
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
    k: usize,
}

impl SemanticRetriever {
    pub fn new(index: VectorIndex, embedder: Arc<dyn Embedder>, k: usize) -> Self {
        Self { index, embedder, k }
    }
}

#[async_trait]
impl Retriever for SemanticRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedCandidate>> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }
        let vector = self
            .embedder
            .embed_query(query)
            .await
            .context("Failed to embed query")?;
        Ok(self.index.search(&vector, self.k))
    }
}

/// Weighted fusion of a syntactic and a semantic retriever.
pub struct HybridRetriever {
    syntactic: Box<dyn Retriever>,
    semantic: Box<dyn Retriever>,
    syntactic_weight: f64,
    semantic_weight: f64,
    c: f64,
}

impl HybridRetriever {
    pub fn new(
        syntactic: Box<dyn Retriever>,
        semantic: Box<dyn Retriever>,
        syntactic_weight: f64,
        semantic_weight: f64,
        c: f64,
    ) -> Self {
        Self {
            syntactic,
            semantic,
            syntactic_weight,
            semantic_weight,
            c,
        }
    }
}

#[async_trait]
impl Retriever for HybridRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedCandidate>> {
        let syntactic = self
            .syntactic
            .retrieve(query)
            .await
            .context("syntactic retrieval failed")?;
        let semantic = self
            .semantic
            .retrieve(query)
            .await
            .context("semantic retrieval failed")?;
        debug!(
            syntactic = syntactic.len(),
            semantic = semantic.len(),
            "fusing candidate lists"
        );
        Ok(fuse(
            &[
                (syntactic.as_slice(), self.syntactic_weight),
                (semantic.as_slice(), self.semantic_weight),
            ],
            self.c,
        ))
    }
}

/// Weighted reciprocal rank fusion over ranked lists.
///
/// Each list contributes `weight / (c + rank)` for every document it holds.
/// Output is ordered by fused score descending; equal scores keep the order
/// in which documents were first seen across the lists.
pub fn fuse(lists: &[(&[RetrievedCandidate], f64)], c: f64) -> Vec<RetrievedCandidate> {
    let mut order: Vec<usize> = Vec::new();
    let mut scores: HashMap<usize, f64> = HashMap::new();

    for (list, weight) in lists {
        let mut seen_in_list = std::collections::HashSet::new();
        for (rank, candidate) in list.iter().enumerate() {
            if !seen_in_list.insert(candidate.doc) {
                continue;
            }
            let contribution = weight / (c + (rank + 1) as f64);
            match scores.get_mut(&candidate.doc) {
                Some(score) => *score += contribution,
                None => {
                    order.push(candidate.doc);
                    scores.insert(candidate.doc, contribution);
                }
            }
        }
    }

    let mut fused: Vec<RetrievedCandidate> = order
        .into_iter()
        .map(|doc| RetrievedCandidate {
            doc,
            score: scores.get(&doc).copied().unwrap_or(0.0),
        })
        .collect();
    // Stable sort keeps first-seen order for ties.
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused
}
