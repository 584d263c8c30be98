//! Chunk enrichment: turn table/image-bearing chunks into searchable summaries.
//!
//! Plain chunks pass through verbatim. Chunks with tables or images are
//! summarized by the text generator from their text, table HTML, and image
//! descriptions. A failed generation falls back to the raw chunk text, so
//! every chunk yields exactly one document.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EnrichConfig;
use crate::llm::{PromptMessage, TextGenerator};
use crate::models::{Chunk, ElementCategory, EnrichedDocument, ImageRecord};
use crate::prompts::enrichment_prompt;
use crate::vision::ImageDescriber;

pub const DOCUMENT_SOURCE: &str = "pdf";

/// Result of summarizing one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Summary {
    Generated(String),
    /// Generation failed or returned nothing; the raw text is used instead.
    Fallback(String),
}

impl Summary {
    pub fn into_content(self) -> String {
        match self {
            Summary::Generated(s) | Summary::Fallback(s) => s,
        }
    }
}

/// Enrich chunks in order, returning one document per chunk.
///
/// All image payloads are described up front (deduplicated, in parallel)
/// before any summary is requested.
pub async fn enrich_chunks(
    chunks: &[Chunk],
    generator: &dyn TextGenerator,
    describer: &ImageDescriber,
    config: &EnrichConfig,
) -> Vec<EnrichedDocument> {
    let payloads: Vec<String> = chunks
        .iter()
        .flat_map(|c| c.elements.iter())
        .filter_map(|e| e.image_base64.clone())
        .collect();
    let mut descriptions = describer.describe_all(&payloads).await.into_iter();

    let mut documents = Vec::with_capacity(chunks.len());
    let mut summarized = 0usize;
    let mut fallbacks = 0usize;

    for chunk in chunks {
        let tables: Vec<String> = chunk
            .elements
            .iter()
            .filter(|e| e.category == ElementCategory::Table)
            .map(|e| e.html.clone().unwrap_or_else(|| e.text.clone()))
            .collect();

        let mut images = Vec::new();
        for element in &chunk.elements {
            if let Some(payload) = &element.image_base64 {
                let description = descriptions
                    .next()
                    .map(|d| d.text().to_string())
                    .unwrap_or_default();
                images.push(ImageRecord {
                    base64: payload.clone(),
                    description,
                    page: element.page,
                });
            }
        }

        let content = if tables.is_empty() && images.is_empty() {
            chunk.text.clone()
        } else {
            let image_descriptions: Vec<String> =
                images.iter().map(|i| i.description.clone()).collect();
            let summary =
                summarize_chunk(generator, &chunk.text, &tables, &image_descriptions, config)
                    .await;
            match summary {
                Summary::Generated(_) => summarized += 1,
                Summary::Fallback(_) => fallbacks += 1,
            }
            summary.into_content()
        };

        documents.push(EnrichedDocument {
            id: Uuid::new_v4().to_string(),
            content,
            source: DOCUMENT_SOURCE.to_string(),
            page: chunk.page,
            has_tables: !tables.is_empty(),
            has_images: !images.is_empty(),
            original_tables: tables,
            original_images: images,
        });
    }

    info!(
        documents = documents.len(),
        summarized,
        fallbacks,
        "enrichment complete"
    );
    documents
}

/// Ask the generator for a summary of one chunk; never fails.
pub async fn summarize_chunk(
    generator: &dyn TextGenerator,
    text: &str,
    tables: &[String],
    image_descriptions: &[String],
    config: &EnrichConfig,
) -> Summary {
    let prompt = enrichment_prompt(text, tables, image_descriptions, config.summary_max_words);
    match generator.generate(&[PromptMessage::Human(prompt)]).await {
        Ok(summary) if !summary.trim().is_empty() => {
            debug!(chars = summary.len(), "chunk summarized");
            Summary::Generated(summary)
        }
        Ok(_) => {
            warn!("empty summary returned, using raw chunk text");
            Summary::Fallback(text.to_string())
        }
        Err(e) => {
            warn!(error = %e, "summary generation failed, using raw chunk text");
            Summary::Fallback(text.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use crate::config::VisionConfig;
    use crate::llm::VisionModel;
    use crate::models::Element;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct EchoGenerator {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(&self, _messages: &[PromptMessage]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("rate limited");
            }
            Ok("SUMMARY".to_string())
        }
    }

    struct StaticVision;

    #[async_trait]
    impl VisionModel for StaticVision {
        async fn describe(&self, _image_base64: &str) -> Result<String> {
            Ok("a line chart".to_string())
        }
    }

    fn chunk(elements: Vec<Element>) -> Chunk {
        let text = elements
            .iter()
            .map(|e| e.text.clone())
            .collect::<Vec<_>>()
            .join("\n\n");
        Chunk {
            page: elements[0].page,
            text,
            elements,
        }
    }

    fn describer() -> ImageDescriber {
        ImageDescriber::new(Arc::new(StaticVision), &VisionConfig::default())
    }

    #[tokio::test]
    async fn test_plain_chunk_passes_through() {
        let generator = EchoGenerator {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let chunks = vec![chunk(vec![Element::new(ElementCategory::Text, "plain body", 2)])];
        let docs = enrich_chunks(&chunks, &generator, &describer(), &EnrichConfig::default())
            .await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "plain body");
        assert!(!docs[0].has_tables && !docs[0].has_images);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_table_chunk_is_summarized() {
        let generator = EchoGenerator {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let chunks = vec![chunk(vec![
            Element::new(ElementCategory::Text, "intro", 3),
            Element::table("a | b", "<table><tr><td>a</td></tr></table>", 3),
            Element::image("Figure 1", "aGVsbG8=", 3),
        ])];
        let docs = enrich_chunks(&chunks, &generator, &describer(), &EnrichConfig::default())
            .await;
        assert_eq!(docs[0].content, "SUMMARY");
        assert!(docs[0].has_tables && docs[0].has_images);
        assert_eq!(docs[0].original_tables, vec!["<table><tr><td>a</td></tr></table>"]);
        assert_eq!(docs[0].original_images[0].description, "a line chart");
        assert_eq!(docs[0].page, 3);
        assert_eq!(docs[0].source, DOCUMENT_SOURCE);
    }

    #[tokio::test]
    async fn test_generation_failure_falls_back_to_text() {
        let generator = EchoGenerator {
            calls: AtomicUsize::new(0),
            fail: true,
        };
        let chunks = vec![chunk(vec![Element::table("x | y", "<table></table>", 1)])];
        let docs = enrich_chunks(&chunks, &generator, &describer(), &EnrichConfig::default())
            .await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "x | y");
        assert!(docs[0].has_tables);
    }
}
