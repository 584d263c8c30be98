//! TOML configuration for the ingestion and query pipeline.
//!
//! Every section has defaults, so an empty file (or [`Config::minimal`]) is a
//! valid configuration. Model endpoints and API key variable names are the
//! only settings most deployments need to touch.
//!
//! ```toml
//! [llm]
//! base_url = "https://api.groq.com/openai/v1"
//! model = "llama-3.1-8b-instant"
//! api_key_env = "GROQ_API_KEY"
//!
//! [retrieval]
//! syntactic_weight = 0.6
//! semantic_weight = 0.4
//!
//! [rerank]
//! top_n = 3
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub partition: PartitionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub enrich: EnrichConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PartitionConfig {
    /// Lower-cased words that flag a page for the high-fidelity pass.
    #[serde(default = "default_complex_keywords")]
    pub complex_keywords: Vec<String>,
    /// Minimum consecutive column-aligned rows recognised as a table.
    #[serde(default = "default_min_table_rows")]
    pub min_table_rows: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            complex_keywords: default_complex_keywords(),
            min_table_rows: default_min_table_rows(),
        }
    }
}

fn default_complex_keywords() -> Vec<String> {
    ["table", "image", "figure", "chart", "diagram", "plot"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_min_table_rows() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_characters")]
    pub max_characters: usize,
    #[serde(default = "default_new_after_n_chars")]
    pub new_after_n_chars: usize,
    #[serde(default = "default_combine_text_under_n_chars")]
    pub combine_text_under_n_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_characters: default_max_characters(),
            new_after_n_chars: default_new_after_n_chars(),
            combine_text_under_n_chars: default_combine_text_under_n_chars(),
        }
    }
}

fn default_max_characters() -> usize {
    3000
}
fn default_new_after_n_chars() -> usize {
    2400
}
fn default_combine_text_under_n_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichConfig {
    /// Upper bound on the summary length requested from the model.
    #[serde(default = "default_summary_words")]
    pub summary_max_words: usize,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            summary_max_words: default_summary_words(),
        }
    }
}

fn default_summary_words() -> usize {
    400
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_syntactic_weight")]
    pub syntactic_weight: f64,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_candidate_k")]
    pub syntactic_k: usize,
    #[serde(default = "default_candidate_k")]
    pub semantic_k: usize,
    /// Rank-fusion damping constant.
    #[serde(default = "default_rrf_c")]
    pub rrf_c: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            syntactic_weight: default_syntactic_weight(),
            semantic_weight: default_semantic_weight(),
            syntactic_k: default_candidate_k(),
            semantic_k: default_candidate_k(),
            rrf_c: default_rrf_c(),
        }
    }
}

fn default_syntactic_weight() -> f64 {
    0.6
}
fn default_semantic_weight() -> f64 {
    0.4
}
fn default_candidate_k() -> usize {
    4
}
fn default_rrf_c() -> f64 {
    60.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    /// `"http"` or `"local"`.
    #[serde(default = "default_rerank_provider")]
    pub provider: String,
    #[serde(default = "default_rerank_model")]
    pub model: String,
    #[serde(default = "default_rerank_url")]
    pub url: String,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: default_rerank_provider(),
            model: default_rerank_model(),
            url: default_rerank_url(),
            top_n: default_top_n(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_rerank_provider() -> String {
    "http".to_string()
}
fn default_rerank_model() -> String {
    "BAAI/bge-reranker-base".to_string()
}
fn default_rerank_url() -> String {
    "http://localhost:8081".to_string()
}
fn default_top_n() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_llm_model() -> String {
    "llama-3.1-8b-instant".to_string()
}
fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_retries() -> u32 {
    3
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct VisionConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_vision_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Concurrent description calls.
    #[serde(default = "default_vision_workers")]
    pub workers: usize,
    /// Per-call timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base64 payloads longer than this short-circuit to a fixed description.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_vision_model(),
            api_key_env: default_api_key_env(),
            workers: default_vision_workers(),
            timeout_secs: default_timeout_secs(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_vision_model() -> String {
    "meta-llama/llama-4-scout-17b-16e-instruct".to_string()
}
fn default_vision_workers() -> usize {
    4
}
fn default_max_payload_bytes() -> usize {
    4 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"`, `"ollama"`, or `"local"`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Session used when the caller does not supply one.
    #[serde(default = "default_session_id")]
    pub default_session_id: String,
    /// Upper bound on a table summary substituted into the answer context.
    #[serde(default = "default_table_context_chars")]
    pub table_context_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_session_id: default_session_id(),
            table_context_chars: default_table_context_chars(),
        }
    }
}

fn default_session_id() -> String {
    "default".to_string()
}
fn default_table_context_chars() -> usize {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Scratch directory for uploaded files; each upload is removed after processing.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            upload_dir: default_upload_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_upload_dir() -> PathBuf {
    std::env::temp_dir().join("paperchat-uploads")
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

impl Config {
    /// All-defaults configuration, used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.max_characters == 0 {
            bail!("chunking.max_characters must be > 0");
        }
        if c.new_after_n_chars > c.max_characters {
            bail!("chunking.new_after_n_chars must be <= chunking.max_characters");
        }
        if c.combine_text_under_n_chars > c.max_characters {
            bail!("chunking.combine_text_under_n_chars must be <= chunking.max_characters");
        }

        let r = &self.retrieval;
        for (name, w) in [
            ("syntactic_weight", r.syntactic_weight),
            ("semantic_weight", r.semantic_weight),
        ] {
            if !(0.0..=1.0).contains(&w) {
                bail!("retrieval.{} must be in [0.0, 1.0]", name);
            }
        }
        if (r.syntactic_weight + r.semantic_weight - 1.0).abs() > 1e-6 {
            bail!("retrieval.syntactic_weight + retrieval.semantic_weight must equal 1.0");
        }
        if r.rrf_c <= 0.0 {
            bail!("retrieval.rrf_c must be > 0");
        }

        if self.rerank.top_n == 0 {
            bail!("rerank.top_n must be >= 1");
        }
        match self.rerank.provider.as_str() {
            "http" | "local" => {}
            other => bail!(
                "Unknown rerank provider: '{}'. Must be http or local.",
                other
            ),
        }

        if self.vision.workers == 0 {
            bail!("vision.workers must be >= 1");
        }

        match self.embedding.provider.as_str() {
            "openai" | "ollama" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be openai, ollama, or local.",
                other
            ),
        }
        if self.embedding.provider == "openai" && self.embedding.model.is_none() {
            bail!("embedding.model must be specified when provider is 'openai'");
        }

        if self.engine.default_session_id.trim().is_empty() {
            bail!("engine.default_session_id must not be empty");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
