//! The owned pipeline context: live corpus, sessions, and capabilities.
//!
//! # Upload
//!
//! ```text
//! partition → chunk → enrich → index → hybrid retriever → reranker
//! ```
//!
//! The new [`Corpus`] is built completely before it replaces the previous
//! one in a single write, so queries either see the old corpus or the new
//! one. A failed upload leaves the previous corpus in place. Uploads are
//! serialized.
//!
//! # Query
//!
//! Queries clone the current corpus handle once and hand it to the
//! [`QueryEngine`] together with the session's history.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{info, warn};

use crate::chunk::chunk_by_title;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::engine::QueryEngine;
use crate::enrich::enrich_chunks;
use crate::error::PipelineError;
use crate::index::build_hybrid_retriever;
use crate::llm::{OpenAiChat, OpenAiVision, TextGenerator, VisionModel};
use crate::models::{EnrichedDocument, ImageRecord, RetrievedCandidate, UploadSummary};
use crate::partition::{partition_document, PartitionBackend, PdfBackend};
use crate::rerank::{create_cross_encoder, CrossEncoder, RerankedRetriever, Reranker};
use crate::retrieval::Retriever;
use crate::session::SessionStore;
use crate::summary::summarize_documents;
use crate::vision::ImageDescriber;

/// External capabilities the pipeline is written against.
#[derive(Clone)]
pub struct Providers {
    pub generator: Arc<dyn TextGenerator>,
    pub vision: Arc<dyn VisionModel>,
    pub embedder: Arc<dyn Embedder>,
    pub cross_encoder: Arc<dyn CrossEncoder>,
    pub backend: Arc<dyn PartitionBackend>,
}

impl Providers {
    /// Concrete providers named by the configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            generator: Arc::new(OpenAiChat::new(&config.llm)?),
            vision: Arc::new(OpenAiVision::new(&config.vision)?),
            embedder: create_embedder(&config.embedding)?,
            cross_encoder: create_cross_encoder(&config.rerank)?,
            backend: Arc::new(PdfBackend::new(&config.partition)),
        })
    }
}

/// One ingested document with its retrieval stack and per-corpus caches.
pub struct Corpus {
    documents: Vec<EnrichedDocument>,
    retriever: RerankedRetriever,
    table_summaries: Mutex<HashMap<u32, String>>,
    summary_text: tokio::sync::OnceCell<String>,
    stats: UploadSummary,
}

impl Corpus {
    pub fn documents(&self) -> &[EnrichedDocument] {
        &self.documents
    }

    pub fn document(&self, index: usize) -> Option<&EnrichedDocument> {
        self.documents.get(index)
    }

    pub fn stats(&self) -> &UploadSummary {
        &self.stats
    }

    /// Hybrid retrieval followed by reranking.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedCandidate>> {
        self.retriever.retrieve(query).await
    }

    /// Every image record across the corpus, in document order.
    pub fn images(&self) -> impl Iterator<Item = &ImageRecord> {
        self.documents.iter().flat_map(|d| d.original_images.iter())
    }

    pub(crate) fn cached_table_summary(&self, page: u32) -> Option<String> {
        let cache = self
            .table_summaries
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        cache.get(&page).cloned()
    }

    pub(crate) fn store_table_summary(&self, page: u32, summary: String) {
        let mut cache = self
            .table_summaries
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        cache.insert(page, summary);
    }
}

pub struct Pipeline {
    config: Config,
    providers: Providers,
    engine: QueryEngine,
    corpus: RwLock<Option<Arc<Corpus>>>,
    upload_lock: tokio::sync::Mutex<()>,
    sessions: SessionStore,
}

impl Pipeline {
    pub fn new(config: Config, providers: Providers) -> Self {
        let engine = QueryEngine::new(providers.generator.clone(), config.engine.clone());
        Self {
            config,
            providers,
            engine,
            corpus: RwLock::new(None),
            upload_lock: tokio::sync::Mutex::new(()),
            sessions: SessionStore::new(),
        }
    }

    /// Validate the configuration and build the configured providers.
    pub fn from_config(config: Config) -> Result<Self, PipelineError> {
        config
            .validate()
            .map_err(|e| PipelineError::Config(format!("{:#}", e)))?;
        let providers =
            Providers::from_config(&config).map_err(|e| PipelineError::Config(format!("{:#}", e)))?;
        Ok(Self::new(config, providers))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Current corpus, if one is loaded.
    pub fn corpus(&self) -> Option<Arc<Corpus>> {
        self.corpus
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Ingest the document at `path` and make it the live corpus.
    pub async fn upload(&self, path: &Path) -> Result<UploadSummary, PipelineError> {
        let _guard = self.upload_lock.lock().await;
        let started = Instant::now();

        let corpus = self.build_corpus(path).await.map_err(|e| {
            warn!(error = %format!("{:#}", e), "upload failed, keeping previous corpus");
            PipelineError::ingestion(e)
        })?;
        let stats = corpus.stats.clone();

        *self.corpus.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(corpus));
        info!(
            documents = stats.documents,
            tables = stats.tables,
            images = stats.images,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "corpus replaced"
        );
        Ok(stats)
    }

    async fn build_corpus(&self, path: &Path) -> Result<Corpus> {
        let backend = self.providers.backend.clone();
        let owned_path = path.to_path_buf();
        let partition_config = self.config.partition.clone();
        let partitioned = tokio::task::spawn_blocking(move || {
            partition_document(backend.as_ref(), &owned_path, &partition_config)
        })
        .await
        .context("partition task panicked")??;

        let chunks = chunk_by_title(&partitioned.elements, &self.config.chunking);
        info!(
            elements = partitioned.elements.len(),
            chunks = chunks.len(),
            "document chunked"
        );

        let describer = ImageDescriber::new(self.providers.vision.clone(), &self.config.vision);
        let documents = enrich_chunks(
            &chunks,
            self.providers.generator.as_ref(),
            &describer,
            &self.config.enrich,
        )
        .await;
        if documents.is_empty() {
            warn!(path = %path.display(), "document produced no retrievable content");
        }

        let hybrid = build_hybrid_retriever(
            &documents,
            self.providers.embedder.clone(),
            &self.config.retrieval,
            self.config.embedding.batch_size,
        )
        .await?;
        let reranker = Reranker::new(self.providers.cross_encoder.clone(), self.config.rerank.top_n);
        let contents = documents.iter().map(|d| d.content.clone()).collect();
        let retriever = RerankedRetriever::new(Box::new(hybrid), reranker, contents);

        let stats = UploadSummary {
            documents: documents.len(),
            tables: documents.iter().map(|d| d.original_tables.len()).sum(),
            images: documents.iter().map(|d| d.original_images.len()).sum(),
            pages: partitioned.page_count,
            hi_res_pages: partitioned.complex_pages.len(),
        };

        Ok(Corpus {
            documents,
            retriever,
            table_summaries: Mutex::new(HashMap::new()),
            summary_text: tokio::sync::OnceCell::new(),
            stats,
        })
    }

    /// Answer `question` in `session_id` (or the default session), rendering
    /// any failure as a descriptive string.
    pub async fn query(&self, question: &str, session_id: Option<&str>) -> String {
        match self.try_query(question, session_id).await {
            Ok(answer) => answer,
            Err(e) => e.to_string(),
        }
    }

    pub async fn try_query(
        &self,
        question: &str,
        session_id: Option<&str>,
    ) -> Result<String, PipelineError> {
        let corpus = self.corpus().ok_or(PipelineError::NoDocuments)?;
        let session_id = session_id.unwrap_or(&self.config.engine.default_session_id);
        let history = self.sessions.get_history(session_id);
        self.engine.answer(&corpus, &history, question).await
    }

    /// Drop the corpus and every session.
    pub fn clear(&self) {
        *self.corpus.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.sessions.clear_all();
        info!("corpus and sessions cleared");
    }

    /// Whole-document summary of the live corpus, computed once per corpus.
    pub async fn summarize(&self) -> Result<String, PipelineError> {
        let corpus = self.corpus().ok_or(PipelineError::NoDocuments)?;
        let generator = self.providers.generator.as_ref();
        corpus
            .summary_text
            .get_or_try_init(|| summarize_documents(generator, &corpus.documents))
            .await
            .cloned()
            .map_err(|e| PipelineError::Generation(format!("{:#}", e)))
    }
}
