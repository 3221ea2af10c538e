//! Embedding provider abstraction backing dense retrieval.
//!
//! Three backends sit behind the [`EmbeddingBackend`] trait:
//! - **builtin** — a deterministic hashed bag-of-words embedding. No
//!   network, no credentials; queries and chunks that share vocabulary
//!   land close in cosine space. The default, and what tests run on.
//! - **openai** — the OpenAI embeddings API with bounded retry/backoff.
//! - **disabled** — errors on use; sparse-only deployments.
//!
//! Also provides vector utilities for SQLite BLOB storage:
//! [`vec_to_blob`], [`blob_to_vec`], and [`cosine_similarity`].
//!
//! # Retry strategy (openai)
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, …)
//! - other 4xx → fail immediately
//! - network errors → retry

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// A backend that turns text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Backend identifier (`"builtin"`, `"openai"`, `"disabled"`).
    fn id(&self) -> &str;

    /// Model identifier recorded alongside stored vectors.
    fn model_name(&self) -> &str;

    /// Embedding vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(backend: &dyn EmbeddingBackend, text: &str) -> Result<Vec<f32>> {
    let mut vectors = backend.embed(&[text.to_string()]).await?;
    if vectors.is_empty() {
        bail!("empty embedding response");
    }
    Ok(vectors.remove(0))
}

/// Create the configured [`EmbeddingBackend`].
pub fn create_backend(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>> {
    match config.provider.as_str() {
        "builtin" => Ok(Arc::new(BuiltinEmbedding::new(config.dims))),
        "openai" => Ok(Arc::new(OpenAiEmbedding::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledEmbedding)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Builtin (hashed bag-of-words) ============

/// Deterministic hashed bag-of-words embedding.
///
/// Each lowercased alphanumeric token is hashed into one of `dims`
/// buckets; the bucket counts are L2-normalized. Cosine similarity then
/// measures vocabulary overlap, which is enough signal for dense
/// retrieval over a small curated corpus and makes every test hermetic.
pub struct BuiltinEmbedding {
    dims: usize,
}

impl BuiltinEmbedding {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            // DefaultHasher::new() uses fixed keys, so bucket
            // assignment is stable across runs.
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dims;
            vec[bucket] += 1.0;
        }
        l2_normalize(&mut vec);
        vec
    }
}

#[async_trait]
impl EmbeddingBackend for BuiltinEmbedding {
    fn id(&self) -> &str {
        "builtin"
    }
    fn model_name(&self) -> &str {
        "hashed-bow"
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Lowercased alphanumeric tokens of length >= 2.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_string())
        .collect()
}

fn l2_normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

// ============ OpenAI ============

/// Embedding backend using the OpenAI embeddings API.
pub struct OpenAiEmbedding {
    model: String,
    dims: usize,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAiEmbedding {
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not in the environment or
    /// the config names no model.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for the openai provider"))?;

        Ok(Self {
            model,
            dims: config.dims,
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedding {
    fn id(&self) -> &str {
        "openai"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(format!("{}/embeddings", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_openai_embeddings(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed after retries")))
    }
}

fn parse_openai_embeddings(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid OpenAI response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("invalid OpenAI response: missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }
    Ok(embeddings)
}

// ============ Disabled ============

/// Errors on use; for sparse-only deployments.
pub struct DisabledEmbedding;

#[async_trait]
impl EmbeddingBackend for DisabledEmbedding {
    fn id(&self) -> &str {
        "disabled"
    }
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedding provider is disabled")
    }
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
