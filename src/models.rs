//! Core data models used throughout the pipeline.
//!
//! These types represent the elements, chunks, enriched documents, and chat
//! messages that flow from ingestion to the conversational query loop.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Kind of content an [`Element`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementCategory {
    Title,
    Text,
    Table,
    Image,
    Other,
}

impl ElementCategory {
    /// Tables and images trigger high-fidelity extraction and enrichment.
    pub fn is_visual(self) -> bool {
        matches!(self, ElementCategory::Table | ElementCategory::Image)
    }
}

/// Atomic unit extracted from a page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Element {
    pub category: ElementCategory,
    pub text: String,
    /// 1-based page number.
    pub page: u32,
    /// HTML rendering for tables.
    pub html: Option<String>,
    /// Base64-encoded image payload.
    pub image_base64: Option<String>,
}

impl Element {
    pub fn new(category: ElementCategory, text: impl Into<String>, page: u32) -> Self {
        Self {
            category,
            text: text.into(),
            page,
            html: None,
            image_base64: None,
        }
    }

    pub fn table(text: impl Into<String>, html: impl Into<String>, page: u32) -> Self {
        Self {
            html: Some(html.into()),
            ..Self::new(ElementCategory::Table, text, page)
        }
    }

    pub fn image(caption: impl Into<String>, base64: impl Into<String>, page: u32) -> Self {
        Self {
            image_base64: Some(base64.into()),
            ..Self::new(ElementCategory::Image, caption, page)
        }
    }
}

/// Ordered group of elements within a size/structure bound.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub text: String,
    /// Page of the first element.
    pub page: u32,
    pub elements: Vec<Element>,
}

/// Image found in a chunk, with its (possibly degraded) description.
#[derive(Debug, Clone, Serialize)]
pub struct ImageRecord {
    pub base64: String,
    pub description: String,
    pub page: u32,
}

/// The retrieval unit: one per chunk.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedDocument {
    pub id: String,
    /// Raw chunk text, or a generated summary when the chunk has tables/images.
    pub content: String,
    pub source: String,
    pub page: u32,
    pub has_tables: bool,
    pub has_images: bool,
    pub original_tables: Vec<String>,
    pub original_images: Vec<ImageRecord>,
}

/// Scored reference into the corpus's document list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievedCandidate {
    /// Index into the corpus document vector.
    pub doc: usize,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

/// One message in a session's history.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Counts returned to the caller after a successful upload.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct UploadSummary {
    pub documents: usize,
    pub tables: usize,
    pub images: usize,
    pub pages: usize,
    pub hi_res_pages: usize,
}
