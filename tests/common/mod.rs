//! Deterministic capability fakes shared by the integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use paperchat::config::Config;
use paperchat::embedding::Embedder;
use paperchat::llm::{PromptMessage, TextGenerator, VisionModel};
use paperchat::models::{Element, ElementCategory};
use paperchat::partition::PartitionBackend;
use paperchat::pipeline::{Pipeline, Providers};
use paperchat::rerank::CrossEncoder;

// ============ Partition backend ============

/// Returns canned elements; `hi_res` elements are filtered to requested pages.
#[derive(Default)]
pub struct FakeBackend {
    pub fast: Mutex<Vec<Element>>,
    pub hi_res: Mutex<Vec<Element>>,
    pub fast_calls: AtomicUsize,
    pub hi_res_calls: AtomicUsize,
    pub hi_res_pages: Mutex<Vec<BTreeSet<u32>>>,
    pub fail: AtomicBool,
}

impl FakeBackend {
    pub fn new(fast: Vec<Element>, hi_res: Vec<Element>) -> Self {
        Self {
            fast: Mutex::new(fast),
            hi_res: Mutex::new(hi_res),
            ..Self::default()
        }
    }
}

impl PartitionBackend for FakeBackend {
    fn fast_pass(&self, _path: &Path) -> Result<Vec<Element>> {
        self.fast_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("corrupt document");
        }
        Ok(self.fast.lock().unwrap().clone())
    }

    fn hi_res_pass(&self, _path: &Path, pages: &BTreeSet<u32>) -> Result<Vec<Element>> {
        self.hi_res_calls.fetch_add(1, Ordering::SeqCst);
        self.hi_res_pages.lock().unwrap().push(pages.clone());
        Ok(self
            .hi_res
            .lock()
            .unwrap()
            .iter()
            .filter(|e| pages.contains(&e.page))
            .cloned()
            .collect())
    }
}

// ============ Text generator ============

pub const ENRICHED_SUMMARY: &str = "GENERATED SUMMARY: accuracy results from the table";
pub const TABLE_DIGEST: &str = "TABLE DIGEST: model A reaches 91.2 accuracy";

/// Recognizes each prompt kind by its opening words and answers with a
/// fixed, recognizable string.
///
/// - reformulation: appends the previous human question, so follow-ups carry
///   their referent into retrieval
/// - answer: `ANSWER: <question>`
#[derive(Default)]
pub struct ScriptedGenerator {
    pub calls: Mutex<Vec<Vec<PromptMessage>>>,
    pub fail_answer: AtomicBool,
    pub fail_enrichment: AtomicBool,
    pub fail_reformulation: AtomicBool,
    /// Added latency for every call, in milliseconds.
    pub delay_ms: AtomicU64,
}

impl ScriptedGenerator {
    /// System prompts of every answer call, in order.
    pub fn answer_contexts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m.first() {
                Some(PromptMessage::System(s)) if s.starts_with("You are an expert research assistant") => {
                    Some(s.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn reformulation_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|m| {
                matches!(m.first(), Some(PromptMessage::System(s)) if s.starts_with("You are a research question reformulator"))
            })
            .count()
    }

    pub fn enrichment_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.first().map(|p| p.content().starts_with("You are an expert research analyst")).unwrap_or(false))
            .count()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, messages: &[PromptMessage]) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let first = messages.first().map(|m| m.content()).unwrap_or("");
        let question = match messages.last() {
            Some(PromptMessage::Human(q)) => q.clone(),
            _ => String::new(),
        };

        if first.starts_with("You are a research question reformulator") {
            if self.fail_reformulation.load(Ordering::SeqCst) {
                bail!("reformulation model unavailable");
            }
            let previous = messages[1..messages.len() - 1]
                .iter()
                .rev()
                .find_map(|m| match m {
                    PromptMessage::Human(h) => Some(h.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            return Ok(format!("{} (following up on: {})", question, previous));
        }
        if first.starts_with("You are an expert research assistant") {
            if self.fail_answer.load(Ordering::SeqCst) {
                bail!("upstream 503");
            }
            return Ok(format!("ANSWER: {}", question));
        }
        if first.starts_with("You are an expert research analyst") {
            if self.fail_enrichment.load(Ordering::SeqCst) {
                bail!("rate limited");
            }
            return Ok(ENRICHED_SUMMARY.to_string());
        }
        if first.starts_with("You are a data analyst") {
            return Ok(TABLE_DIGEST.to_string());
        }
        if first.contains("Combine these summaries") {
            return Ok("FINAL SUMMARY".to_string());
        }
        if first.contains("research paper summarizer") {
            return Ok("PARTIAL SUMMARY".to_string());
        }
        bail!("unexpected prompt: {}", first)
    }
}

// ============ Vision ============

pub const IMAGE_DESCRIPTION: &str = "A bar chart comparing model accuracy";

#[derive(Default)]
pub struct FakeVision {
    pub calls: AtomicUsize,
    pub panic: AtomicBool,
}

#[async_trait]
impl VisionModel for FakeVision {
    async fn describe(&self, _image_base64: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic.load(Ordering::SeqCst) {
            panic!("image decoder bug");
        }
        Ok(IMAGE_DESCRIPTION.to_string())
    }
}

// ============ Embedder ============

/// Bag-of-words hashed into 32 buckets.
pub struct HashEmbedder;

const DIMS: usize = 32;

fn bucket(word: &str) -> usize {
    word.bytes()
        .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize))
        % DIMS
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; DIMS];
                for word in t.split_whitespace() {
                    v[bucket(&word.to_lowercase())] += 1.0;
                }
                v
            })
            .collect())
    }
}

// ============ Cross-encoder ============

/// Scores by the number of query words present in the document and records
/// every query it sees.
#[derive(Default)]
pub struct OverlapEncoder {
    pub queries: Mutex<Vec<String>>,
}

#[async_trait]
impl CrossEncoder for OverlapEncoder {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        self.queries.lock().unwrap().push(query.to_string());
        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();
        Ok(documents
            .iter()
            .map(|d| {
                let doc = d.to_lowercase();
                words.iter().filter(|w| doc.contains(w.as_str())).count() as f32
            })
            .collect())
    }
}

// ============ Harness ============

pub struct Harness {
    pub pipeline: Arc<Pipeline>,
    pub backend: Arc<FakeBackend>,
    pub generator: Arc<ScriptedGenerator>,
    pub vision: Arc<FakeVision>,
    pub encoder: Arc<OverlapEncoder>,
}

pub fn harness(backend: FakeBackend) -> Harness {
    harness_with_config(backend, Config::minimal())
}

pub fn harness_with_config(backend: FakeBackend, config: Config) -> Harness {
    let backend = Arc::new(backend);
    let generator = Arc::new(ScriptedGenerator::default());
    let vision = Arc::new(FakeVision::default());
    let encoder = Arc::new(OverlapEncoder::default());
    let providers = Providers {
        generator: generator.clone(),
        vision: vision.clone(),
        embedder: Arc::new(HashEmbedder),
        cross_encoder: encoder.clone(),
        backend: backend.clone(),
    };
    Harness {
        pipeline: Arc::new(Pipeline::new(config, providers)),
        backend,
        generator,
        vision,
        encoder,
    }
}

pub fn title(text: &str, page: u32) -> Element {
    Element::new(ElementCategory::Title, text, page)
}

pub fn text(body: &str, page: u32) -> Element {
    Element::new(ElementCategory::Text, body, page)
}

/// A paragraph of roughly `chars` characters about `topic`.
pub fn paragraph(topic: &str, chars: usize) -> String {
    let sentence = format!("This section discusses {} in considerable depth. ", topic);
    sentence.repeat(chars / sentence.len() + 1)
}
