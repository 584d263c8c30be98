//! Map-reduce summary of a whole document.
//!
//! Document contents are packed into batches of roughly [`BATCH_CHARS`]
//! characters. Each batch is summarized (map), then the partial summaries are
//! combined into one final summary (reduce). A single batch skips the reduce
//! step.

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::llm::{PromptMessage, TextGenerator};
use crate::models::EnrichedDocument;
use crate::prompts::{combine_prompt, map_prompt};

pub const BATCH_CHARS: usize = 6000;

/// Group texts into batches whose joined length stays near `limit` chars.
/// A single text longer than `limit` forms its own batch.
fn batches(texts: &[&str], limit: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for text in texts {
        if !current.is_empty() && current.chars().count() + text.chars().count() + 2 > limit {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(text);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

pub async fn summarize_documents(
    generator: &dyn TextGenerator,
    documents: &[EnrichedDocument],
) -> Result<String> {
    let texts: Vec<&str> = documents
        .iter()
        .map(|d| d.content.as_str())
        .filter(|t| !t.trim().is_empty())
        .collect();
    if texts.is_empty() {
        bail!("document has no text to summarize");
    }

    let batches = batches(&texts, BATCH_CHARS);
    debug!(batches = batches.len(), "map step");

    let mut partials = Vec::with_capacity(batches.len());
    for (i, batch) in batches.iter().enumerate() {
        let partial = generator
            .generate(&[PromptMessage::Human(map_prompt(batch))])
            .await
            .with_context(|| format!("map step failed on batch {}", i + 1))?;
        partials.push(partial);
    }

    if partials.len() == 1 {
        return Ok(partials.remove(0));
    }

    generator
        .generate(&[PromptMessage::Human(combine_prompt(&partials.join("\n\n")))])
        .await
        .context("combine step failed")
}
