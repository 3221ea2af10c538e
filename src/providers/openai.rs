//! OpenAI-compatible chat adapters for the LLM capabilities.
//!
//! One client serves classify, reformulate, and generate; the three
//! capabilities differ only in their prompts. Any OpenAI-compatible
//! endpoint works via `providers.openai.base_url`.
//!
//! Retry strategy (shared with the embedding adapter):
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, …)
//! - other 4xx → fail immediately
//! - network errors → retry

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::OpenAiConfig;
use crate::models::{Message, ResponseType, Role};

use super::{
    evidence_block, ClassifyProvider, GenerateProvider, GenerationRequest, ReformulateProvider,
};

const CLASSIFY_SYSTEM_PROMPT: &str = "You label questions sent to a childcare-assistance help \
service. Reply with exactly one word: 'informational' for questions answerable from policy \
documentation, 'needs_action' when the asker wants to apply, renew, appeal, or submit something, \
and 'out_of_scope' for anything unrelated to childcare assistance.";

const REFORMULATE_SYSTEM_PROMPT: &str = "Rewrite the user's latest question as a single \
self-contained search query about childcare assistance. Resolve pronouns and references using \
the prior turns. Reply with the rewritten query only, no commentary.";

const GENERATE_SYSTEM_PROMPT: &str = "You answer questions about childcare assistance using ONLY \
the numbered context passages provided. Never state anything the passages do not support. Cite \
each fact with its passage number in square brackets, e.g. [1]. If the passages do not answer \
the question, say you could not find it in the documentation.";

pub struct OpenAiChat {
    base_url: String,
    default_model: String,
    api_key: Option<String>,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAiChat {
    pub fn from_config(config: &OpenAiConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            default_model: config.model.clone(),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        }
    }

    /// Why this adapter cannot be used yet, if anything.
    pub fn credential_issue(&self) -> Option<String> {
        if self.api_key.is_none() {
            Some("OPENAI_API_KEY environment variable not set".to_string())
        } else {
            None
        }
    }

    /// Call `POST {base_url}/chat/completions` with retry/backoff and
    /// return the first choice's message content.
    async fn chat_complete(
        &self,
        messages: Vec<serde_json::Value>,
        model: Option<&str>,
    ) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": model.unwrap_or(&self.default_model),
            "messages": messages,
            "temperature": 0.0,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(format!("{}/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_chat_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("chat completion failed after retries")))
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(|t| t.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("invalid chat completion response: missing content"))
}

/// Render recent turns for a prompt, oldest first.
fn transcript(history: &[Message]) -> String {
    history
        .iter()
        .map(|m| {
            let speaker = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("{}: {}", speaker, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Map the model's one-word label back into the closed tag set.
/// Unrecognized output is an error; the classify stage supplies the
/// default.
fn parse_response_type(text: &str) -> Result<ResponseType> {
    let lower = text.to_lowercase();
    if lower.contains("out_of_scope") || lower.contains("out of scope") {
        Ok(ResponseType::OutOfScope)
    } else if lower.contains("needs_action") || lower.contains("needs action") {
        Ok(ResponseType::NeedsAction)
    } else if lower.contains("informational") {
        Ok(ResponseType::Informational)
    } else {
        bail!("unrecognized classification label: '{}'", text)
    }
}

#[async_trait]
impl ClassifyProvider for OpenAiChat {
    fn id(&self) -> &str {
        "openai"
    }

    fn description(&self) -> String {
        format!("OpenAI chat classifier ({})", self.default_model)
    }

    async fn classify(
        &self,
        question: &str,
        history: &[Message],
        model: Option<&str>,
    ) -> Result<ResponseType> {
        let mut user = String::new();
        if !history.is_empty() {
            user.push_str(&format!("Prior turns:\n{}\n\n", transcript(history)));
        }
        user.push_str(&format!("Question: {}", question));

        let text = self
            .chat_complete(
                vec![
                    serde_json::json!({"role": "system", "content": CLASSIFY_SYSTEM_PROMPT}),
                    serde_json::json!({"role": "user", "content": user}),
                ],
                model,
            )
            .await?;
        parse_response_type(&text)
    }
}

#[async_trait]
impl ReformulateProvider for OpenAiChat {
    fn id(&self) -> &str {
        "openai"
    }

    async fn reformulate(
        &self,
        question: &str,
        history: &[Message],
        model: Option<&str>,
    ) -> Result<String> {
        let user = format!(
            "Prior turns:\n{}\n\nLatest question: {}",
            transcript(history),
            question
        );
        let text = self
            .chat_complete(
                vec![
                    serde_json::json!({"role": "system", "content": REFORMULATE_SYSTEM_PROMPT}),
                    serde_json::json!({"role": "user", "content": user}),
                ],
                model,
            )
            .await?;
        if text.is_empty() {
            bail!("empty reformulation");
        }
        Ok(text)
    }
}

#[async_trait]
impl GenerateProvider for OpenAiChat {
    fn id(&self) -> &str {
        "openai"
    }

    fn description(&self) -> String {
        format!("OpenAI chat generator ({})", self.default_model)
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": format!(
                "{}\n\nContext passages:\n{}",
                GENERATE_SYSTEM_PROMPT,
                evidence_block(request.evidence)
            ),
        })];

        for turn in request.history {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(serde_json::json!({"role": role, "content": turn.content}));
        }
        messages.push(serde_json::json!({"role": "user", "content": request.query}));

        let answer = self.chat_complete(messages, request.model).await?;
        if answer.is_empty() {
            bail!("empty generation");
        }
        Ok(answer)
    }
}
