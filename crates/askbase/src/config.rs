//! Configuration parsing and validation.
//!
//! askbase is configured from one TOML file (default
//! `config/askbase.toml`). Every section except `[db]` is optional and
//! falls back to the defaults below.
//!
//! ```toml
//! [db]
//! path = "./data/askbase.sqlite"
//!
//! [chunking]
//! max_tokens = 800
//! overlap_tokens = 120
//! tokenizer = "cl100k"        # or "whitespace" (approximate)
//!
//! [retrieval]
//! lexical_k = 20
//! vector_k = 20
//! digest_k = 4
//! fused_max = 8
//! lexical_weight = 0.5
//! vector_weight = 0.5
//! normalization = "min_max"   # or "rank"
//! query_timeout_secs = 20
//!
//! [evidence]
//! token_budget = 3000
//! include_qa = true
//! qa_k = 3
//! qa_min_similarity = 0.8
//!
//! [embedding]
//! provider = "openai"         # "disabled" | "openai" | "ollama"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "openai"         # "disabled" | "openai"
//! model = "gpt-4o-mini"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```
//!
//! API keys are read from the environment (`OPENAI_API_KEY`), never from
//! this file.

use anyhow::{bail, Context, Result};
use askbase_core::chunk::ChunkConfig;
use askbase_core::embedding::RetryPolicy;
use askbase_core::fusion::{FusionParams, Normalization};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You answer questions about the OnlyAi course and AI-OFM strategies. Be concise and direct.";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub evidence: EvidenceConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
            tokenizer: default_tokenizer(),
        }
    }
}

impl ChunkingConfig {
    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            max_tokens: self.max_tokens,
            overlap_tokens: self.overlap_tokens,
        }
    }
}

fn default_max_tokens() -> usize {
    800
}
fn default_overlap() -> usize {
    120
}
fn default_tokenizer() -> String {
    "cl100k".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_candidate_k")]
    pub lexical_k: usize,
    #[serde(default = "default_candidate_k")]
    pub vector_k: usize,
    #[serde(default = "default_digest_k")]
    pub digest_k: usize,
    #[serde(default = "default_fused_max")]
    pub fused_max: usize,
    #[serde(default = "default_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_weight")]
    pub vector_weight: f64,
    #[serde(default)]
    pub normalization: Normalization,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_k: default_candidate_k(),
            vector_k: default_candidate_k(),
            digest_k: default_digest_k(),
            fused_max: default_fused_max(),
            lexical_weight: default_weight(),
            vector_weight: default_weight(),
            normalization: Normalization::default(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

impl RetrievalConfig {
    pub fn fusion_params(&self) -> FusionParams {
        FusionParams {
            lexical_weight: self.lexical_weight,
            vector_weight: self.vector_weight,
            normalization: self.normalization,
            max_candidates: self.fused_max,
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

fn default_candidate_k() -> usize {
    20
}
fn default_digest_k() -> usize {
    4
}
fn default_fused_max() -> usize {
    8
}
fn default_weight() -> f64 {
    0.5
}
fn default_query_timeout() -> u64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvidenceConfig {
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default = "default_true")]
    pub include_qa: bool,
    #[serde(default = "default_qa_k")]
    pub qa_k: usize,
    #[serde(default = "default_qa_min_similarity")]
    pub qa_min_similarity: f64,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            include_qa: true,
            qa_k: default_qa_k(),
            qa_min_similarity: default_qa_min_similarity(),
        }
    }
}

fn default_token_budget() -> usize {
    3000
}
fn default_true() -> bool {
    true
}
fn default_qa_k() -> usize {
    3
}
fn default_qa_min_similarity() -> f64 {
    0.8
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (e.g. a local Ollama or an OpenAI-compatible proxy).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_timeout_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_concurrency() -> usize {
    2
}
fn default_max_retries() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    32_000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_cache_capacity() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_answer_chars")]
    pub max_answer_chars: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            system_prompt: default_system_prompt(),
            max_answer_chars: default_max_answer_chars(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}
fn default_max_answer_chars() -> usize {
    500
}
fn default_temperature() -> f32 {
    0.7
}
fn default_generation_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["**/*.md", "**/*.txt", "**/*.pdf", "**/*.docx"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML configuration string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be smaller than chunking.max_tokens");
    }
    match config.chunking.tokenizer.as_str() {
        "cl100k" | "whitespace" => {}
        other => bail!(
            "Unknown tokenizer: '{}'. Must be cl100k or whitespace.",
            other
        ),
    }

    // Validate retrieval
    let r = &config.retrieval;
    if r.fused_max < 1 {
        bail!("retrieval.fused_max must be >= 1");
    }
    if r.lexical_weight < 0.0 || r.vector_weight < 0.0 {
        bail!("retrieval weights must be non-negative");
    }
    if r.lexical_weight + r.vector_weight <= 0.0 {
        bail!("retrieval.lexical_weight + retrieval.vector_weight must be > 0");
    }
    if r.query_timeout_secs == 0 {
        bail!("retrieval.query_timeout_secs must be > 0");
    }

    if !(-1.0..=1.0).contains(&config.evidence.qa_min_similarity) {
        bail!("evidence.qa_min_similarity must be in [-1.0, 1.0]");
    }

    // Validate embedding
    let e = &config.embedding;
    match e.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if e.is_enabled() {
        if e.dims.is_none() || e.dims == Some(0) {
            bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
        }
        if e.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                e.provider
            );
        }
    }
    if e.batch_size == 0 {
        bail!("embedding.batch_size must be >= 1");
    }
    if e.concurrency == 0 {
        bail!("embedding.concurrency must be >= 1");
    }

    // Validate generation
    let g = &config.generation;
    match g.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if g.is_enabled() && g.model.is_none() {
        bail!(
            "generation.model must be specified when provider is '{}'",
            g.provider
        );
    }

    Ok(config)
}
