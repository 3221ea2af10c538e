use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::RetrievalMode;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7410".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    400
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Active retrieval mode: dense, sparse, or hybrid.
    #[serde(default = "default_mode")]
    pub mode: RetrievalMode,
    /// Maximum evidence chunks returned to the pipeline.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Candidates fetched per retrieval leg before fusion/truncation.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
    /// Reciprocal-rank-fusion smoothing constant for hybrid mode.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            top_k: default_top_k(),
            candidate_k: default_candidate_k(),
            rrf_k: default_rrf_k(),
        }
    }
}

fn default_mode() -> RetrievalMode {
    RetrievalMode::Hybrid
}
fn default_top_k() -> usize {
    12
}
fn default_candidate_k() -> i64 {
    50
}
fn default_rrf_k() -> u32 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    /// Maximum evidence passed to the generator.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
        }
    }
}

fn default_top_n() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `builtin`, `openai`, or `disabled`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_embedding_provider() -> String {
    "builtin".to_string()
}
fn default_dims() -> usize {
    256
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Per-capability backend selection plus remote adapter settings.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProvidersConfig {
    #[serde(default = "default_provider_name")]
    pub generator: String,
    #[serde(default = "default_provider_name")]
    pub classifier: String,
    #[serde(default = "default_provider_name")]
    pub reformulator: String,
    #[serde(default = "default_provider_name")]
    pub reranker: String,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub cohere: CohereConfig,
}

fn default_provider_name() -> String {
    "builtin".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    /// OpenAI-compatible endpoints work by overriding this.
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct CohereConfig {
    #[serde(default = "default_cohere_base_url")]
    pub base_url: String,
    #[serde(default = "default_cohere_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for CohereConfig {
    fn default() -> Self {
        Self {
            base_url: default_cohere_base_url(),
            model: default_cohere_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_cohere_base_url() -> String {
    "https://api.cohere.com/v1".to_string()
}
fn default_cohere_model() -> String {
    "rerank-english-v3.0".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Bound on concurrently held sessions; least-recently-loaded
    /// sessions are evicted past this.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Most recent turns handed to the classifier and reformulator.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            history_turns: default_history_turns(),
        }
    }
}

fn default_max_sessions() -> usize {
    1024
}
fn default_history_turns() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Process-wide default for whether prior turns influence query
    /// interpretation. Per-request override wins.
    #[serde(default = "default_conversational_mode")]
    pub conversational_mode: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            conversational_mode: default_conversational_mode(),
        }
    }
}

fn default_conversational_mode() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

const KNOWN_LLM_PROVIDERS: &[&str] = &["builtin", "openai"];
const KNOWN_RERANK_PROVIDERS: &[&str] = &["builtin", "cohere"];
const KNOWN_EMBEDDING_PROVIDERS: &[&str] = &["builtin", "openai", "disabled"];

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    let config = apply_env_overrides(config)?;
    validate(&config)?;
    Ok(config)
}

/// Environment overrides for the deployment-facing selection keys.
/// Each one replaces its TOML counterpart when set.
fn apply_env_overrides(mut config: Config) -> Result<Config> {
    if let Ok(v) = std::env::var("LLM_PROVIDER") {
        config.providers.generator = v;
    }
    if let Ok(v) = std::env::var("RERANKER_PROVIDER") {
        config.providers.reranker = v;
    }
    if let Ok(v) = std::env::var("REFORMULATOR_PROVIDER") {
        config.providers.reformulator = v;
    }
    if let Ok(v) = std::env::var("INTENT_CLASSIFIER_PROVIDER") {
        config.providers.classifier = v;
    }
    if let Ok(v) = std::env::var("RETRIEVAL_MODE") {
        config.retrieval.mode = v
            .parse()
            .map_err(|e: String| anyhow::anyhow!("RETRIEVAL_MODE: {}", e))?;
    }
    if let Ok(v) = std::env::var("CONVERSATIONAL_MODE") {
        config.chat.conversational_mode = match v.as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => anyhow::bail!("CONVERSATIONAL_MODE must be a boolean, got '{}'", other),
        };
    }
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.candidate_k < 1 {
        anyhow::bail!("retrieval.candidate_k must be >= 1");
    }
    if config.rerank.top_n == 0 {
        anyhow::bail!("rerank.top_n must be >= 1");
    }
    if config.session.max_sessions == 0 {
        anyhow::bail!("session.max_sessions must be >= 1");
    }

    for (name, value, known) in [
        ("providers.generator", &config.providers.generator, KNOWN_LLM_PROVIDERS),
        ("providers.classifier", &config.providers.classifier, KNOWN_LLM_PROVIDERS),
        (
            "providers.reformulator",
            &config.providers.reformulator,
            KNOWN_LLM_PROVIDERS,
        ),
        ("providers.reranker", &config.providers.reranker, KNOWN_RERANK_PROVIDERS),
    ] {
        if !known.contains(&value.as_str()) {
            anyhow::bail!("Unknown provider for {}: '{}'. Must be one of {:?}.", name, value, known);
        }
    }

    if !KNOWN_EMBEDDING_PROVIDERS.contains(&config.embedding.provider.as_str()) {
        anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be builtin, openai, or disabled.",
            config.embedding.provider
        );
    }
    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.retrieval.mode.uses_dense() && !config.embedding.is_enabled() {
        anyhow::bail!(
            "retrieval.mode '{}' requires embeddings. Set [embedding] provider.",
            config.retrieval.mode.as_str()
        );
    }

    Ok(())
}

impl Config {
    /// A self-contained config for tests and ad-hoc tooling: builtin
    /// providers everywhere, database at the given path.
    pub fn minimal(db_path: PathBuf) -> Self {
        Self {
            db: DbConfig { path: db_path },
            server: ServerConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            rerank: RerankConfig::default(),
            embedding: EmbeddingConfig::default(),
            providers: ProvidersConfig {
                generator: "builtin".to_string(),
                classifier: "builtin".to_string(),
                reformulator: "builtin".to_string(),
                reranker: "builtin".to_string(),
                openai: OpenAiConfig::default(),
                cohere: CohereConfig::default(),
            },
            session: SessionConfig::default(),
            chat: ChatConfig::default(),
            corpus: CorpusConfig::default(),
        }
    }
}
