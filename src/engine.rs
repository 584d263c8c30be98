//! Conversational query engine.
//!
//! One turn runs five stages while holding the session's history lock:
//!
//! 1. **Reformulate** the question into a standalone one using the history
//!    (skipped for an empty history; falls back to the raw question).
//! 2. **Retrieve** with the hybrid retriever and rerank.
//! 3. **Augment**: table-bearing documents are replaced with a cached,
//!    table-focused digest of their page; visual questions get image
//!    descriptions appended.
//! 4. **Answer** under the fixed system policy with history.
//! 5. **Persist** the (question, answer) pair. A failed turn persists nothing.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::PipelineError;
use crate::llm::{with_history, PromptMessage, TextGenerator};
use crate::models::{ChatMessage, EnrichedDocument, RetrievedCandidate};
use crate::partition::mentions_any;
use crate::pipeline::Corpus;
use crate::prompts::{answer_system, table_summary_prompt, REFORMULATION_SYSTEM};
use crate::session::SessionHistory;
use crate::vision::is_placeholder_text;

/// Question words that pull image descriptions into the context.
pub const VISUAL_KEYWORDS: [&str; 6] = ["figure", "image", "chart", "graph", "diagram", "visual"];

/// Cap on corpus-wide image descriptions used when no retrieved document
/// carries any.
const MAX_FALLBACK_IMAGES: usize = 5;

const DOCUMENT_SEPARATOR: &str = "\n\n---\n\n";

pub struct QueryEngine {
    generator: Arc<dyn TextGenerator>,
    config: EngineConfig,
}

impl QueryEngine {
    pub fn new(generator: Arc<dyn TextGenerator>, config: EngineConfig) -> Self {
        Self { generator, config }
    }

    /// Run one conversational turn against `corpus`.
    pub async fn answer(
        &self,
        corpus: &Corpus,
        history: &SessionHistory,
        question: &str,
    ) -> Result<String, PipelineError> {
        let mut history = history.lock().await;

        let standalone = self.reformulate(&history, question).await;
        debug!(standalone = %standalone, "reformulated question");

        let candidates = corpus
            .retrieve(&standalone)
            .await
            .map_err(|e| PipelineError::Retrieval(format!("{:#}", e)))?;
        info!(candidates = candidates.len(), "retrieved context");

        let context = self.build_context(corpus, &candidates, question).await;

        let messages = with_history(&answer_system(&context), &history, question);
        let answer = self
            .generator
            .generate(&messages)
            .await
            .map_err(|e| PipelineError::Generation(format!("{:#}", e)))?;

        history.push(ChatMessage::human(question));
        history.push(ChatMessage::assistant(answer.clone()));
        Ok(answer)
    }

    /// Standalone form of `question`; never fails.
    pub async fn reformulate(&self, history: &[ChatMessage], question: &str) -> String {
        if history.is_empty() {
            return question.to_string();
        }
        let messages = with_history(REFORMULATION_SYSTEM, history, question);
        match self.generator.generate(&messages).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => rewritten.trim().to_string(),
            Ok(_) => question.to_string(),
            Err(e) => {
                warn!(error = %e, "reformulation failed, using original question");
                question.to_string()
            }
        }
    }

    /// Assemble the answer context from the reranked candidates.
    pub async fn build_context(
        &self,
        corpus: &Corpus,
        candidates: &[RetrievedCandidate],
        question: &str,
    ) -> String {
        let retrieved: Vec<&EnrichedDocument> = candidates
            .iter()
            .filter_map(|c| corpus.document(c.doc))
            .collect();

        let mut blocks = Vec::with_capacity(retrieved.len());
        for doc in &retrieved {
            let body = if doc.has_tables {
                self.table_context(corpus, doc).await
            } else {
                doc.content.clone()
            };
            blocks.push(format!("[Page {}]\n{}", doc.page, body));
        }
        let mut context = blocks.join(DOCUMENT_SEPARATOR);

        if mentions_any(question, &VISUAL_KEYWORDS) {
            let descriptions = image_descriptions(corpus, &retrieved);
            if !descriptions.is_empty() {
                context.push_str("\n\nIMAGE DESCRIPTIONS:\n");
                context.push_str(&descriptions.join("\n"));
            }
        }
        context
    }

    /// Table digest for the document's page, generated once per corpus.
    /// Falls back to the document content when generation fails.
    async fn table_context(&self, corpus: &Corpus, doc: &EnrichedDocument) -> String {
        if let Some(cached) = corpus.cached_table_summary(doc.page) {
            return cached;
        }

        let on_page: Vec<&EnrichedDocument> = corpus
            .documents()
            .iter()
            .filter(|d| d.page == doc.page && d.has_tables)
            .collect();
        let content = on_page
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let tables: Vec<String> = on_page
            .iter()
            .flat_map(|d| d.original_tables.iter().cloned())
            .collect();

        let prompt = table_summary_prompt(doc.page, &content, &tables);
        match self.generator.generate(&[PromptMessage::Human(prompt)]).await {
            Ok(summary) if !summary.trim().is_empty() => {
                let bounded = truncate_chars(summary.trim(), self.config.table_context_chars);
                corpus.store_table_summary(doc.page, bounded.clone());
                bounded
            }
            Ok(_) => doc.content.clone(),
            Err(e) => {
                warn!(page = doc.page, error = %e, "table summary failed, using document content");
                doc.content.clone()
            }
        }
    }
}

/// Usable image descriptions from the retrieved documents, or from the whole
/// corpus when the retrieved set has none.
fn image_descriptions(corpus: &Corpus, retrieved: &[&EnrichedDocument]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let from_retrieved: Vec<String> = retrieved
        .iter()
        .flat_map(|d| d.original_images.iter())
        .filter(|img| !is_placeholder_text(&img.description))
        .filter(|img| seen.insert(img.description.clone()))
        .map(|img| format!("- [Page {}] {}", img.page, img.description))
        .collect();
    if !from_retrieved.is_empty() {
        return from_retrieved;
    }

    let mut seen = std::collections::HashSet::new();
    corpus
        .images()
        .filter(|img| !is_placeholder_text(&img.description))
        .filter(|img| seen.insert(img.description.clone()))
        .take(MAX_FALLBACK_IMAGES)
        .map(|img| format!("- [Page {}] {}", img.page, img.description))
        .collect()
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_visual_keywords_detection() {
        assert!(mentions_any("What does Figure 3 show?", &VISUAL_KEYWORDS));
        assert!(mentions_any("describe the graphs", &VISUAL_KEYWORDS));
        assert!(!mentions_any("What is the accuracy?", &VISUAL_KEYWORDS));
    }
}
