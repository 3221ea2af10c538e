//! Cohere rerank adapter.
//!
//! Calls `POST {base_url}/rerank` and maps the returned
//! `(index, relevance_score)` pairs back into input order, so callers
//! get one score per candidate regardless of how the API sorts its
//! results.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::CohereConfig;

use super::RerankProvider;

pub struct CohereRerank {
    base_url: String,
    default_model: String,
    api_key: Option<String>,
    timeout_secs: u64,
    max_retries: u32,
}

impl CohereRerank {
    pub fn from_config(config: &CohereConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            default_model: config.model.clone(),
            api_key: std::env::var("COHERE_API_KEY").ok(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        }
    }

    pub fn credential_issue(&self) -> Option<String> {
        if self.api_key.is_none() {
            Some("COHERE_API_KEY environment variable not set".to_string())
        } else {
            None
        }
    }
}

/// Reorder API results into input order. Every candidate must receive
/// a score; a missing or out-of-range index is a protocol error.
fn scores_in_input_order(json: &serde_json::Value, len: usize) -> Result<Vec<f64>> {
    let results = json
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid rerank response: missing results"))?;

    let mut scores = vec![None; len];
    for entry in results {
        let index = entry
            .get("index")
            .and_then(|i| i.as_u64())
            .ok_or_else(|| anyhow::anyhow!("invalid rerank response: missing index"))? as usize;
        let score = entry
            .get("relevance_score")
            .and_then(|s| s.as_f64())
            .ok_or_else(|| anyhow::anyhow!("invalid rerank response: missing relevance_score"))?;
        if index >= len {
            bail!("invalid rerank response: index {} out of range", index);
        }
        scores[index] = Some(score);
    }

    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| anyhow::anyhow!("rerank response missing score for {}", i)))
        .collect()
}

#[async_trait]
impl RerankProvider for CohereRerank {
    fn id(&self) -> &str {
        "cohere"
    }

    fn description(&self) -> String {
        format!("Cohere reranker ({})", self.default_model)
    }

    async fn scores(&self, query: &str, texts: &[String], model: Option<&str>) -> Result<Vec<f64>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("COHERE_API_KEY not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": model.unwrap_or(&self.default_model),
            "query": query,
            "documents": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(format!("{}/rerank", self.base_url))
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return scores_in_input_order(&json, texts.len());
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("Cohere API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Cohere API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("rerank failed after retries")))
    }
}
