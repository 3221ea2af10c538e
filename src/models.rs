//! Core data models used throughout carechat.
//!
//! These types represent the conversation turns, evidence chunks, and
//! request/response payloads that flow through the query pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Classification tag steering downstream answer shape.
///
/// The set is closed: `informational` produces a plain grounded answer,
/// `needs_action` additionally attaches action items, and `out_of_scope`
/// short-circuits retrieval and generation entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Informational,
    NeedsAction,
    OutOfScope,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Informational => "informational",
            ResponseType::NeedsAction => "needs_action",
            ResponseType::OutOfScope => "out_of_scope",
        }
    }
}

/// One turn in a conversation. Immutable once appended to a session.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_items: Option<Vec<ActionItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_type: Option<ResponseType>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
}

impl Message {
    /// A plain user turn with no assistant metadata.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: None,
            action_items: None,
            response_type: None,
            timestamp: Utc::now(),
            processing_time: None,
        }
    }
}

/// One retrievable unit of source text, scored by the active retrieval
/// mode. Scores are retrieval-stage-specific and are not comparable
/// across modes.
#[derive(Debug, Clone)]
pub struct EvidenceChunk {
    pub chunk_id: String,
    /// Document title, falling back to the relative corpus path.
    pub doc: String,
    /// Chunk index within the document, used as the citation location.
    pub location: i64,
    pub url: Option<String>,
    pub text: String,
    pub score: f64,
}

/// An [`EvidenceChunk`] with a reranker-assigned relevance score and a
/// rank position. Rank positions form a strict total order; ties in
/// relevance preserve the original retrieval order.
#[derive(Debug, Clone)]
pub struct RankedEvidence {
    pub chunk: EvidenceChunk,
    pub relevance: f64,
    pub rank: usize,
}

/// A citation attached to an answer.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub doc: String,
    pub page: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Source {
    pub fn from_chunk(chunk: &EvidenceChunk) -> Self {
        Self {
            doc: chunk.doc.clone(),
            page: chunk.location,
            url: chunk.url.clone(),
        }
    }
}

/// A suggested next step attached to `needs_action` answers.
#[derive(Debug, Clone, Serialize)]
pub struct ActionItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Inbound chat query.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Backend override for the LLM capabilities (classify, reformulate,
    /// generate). Must name a registered provider.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub llm_model: Option<String>,
    #[serde(default)]
    pub reranker_model: Option<String>,
    #[serde(default)]
    pub intent_model: Option<String>,
    /// Defaults to the process-wide configured value when absent.
    #[serde(default)]
    pub conversational_mode: Option<bool>,
}

/// Outbound answer. `session_id` is always present; one is generated
/// when the request carried none.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub response_type: ResponseType,
    pub action_items: Vec<ActionItem>,
    /// Elapsed wall-clock seconds for the whole pipeline run.
    pub processing_time: f64,
    pub session_id: String,
    /// ISO-8601 timestamp of response assembly.
    pub timestamp: String,
}

/// `GET /health` response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub chatbot_initialized: bool,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One selectable model in the `GET /models` listing.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

/// Default backend per capability in the `GET /models` listing.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDefaults {
    pub generator: String,
    pub reranker: String,
    pub classifier: String,
}

/// `GET /models` response body.
#[derive(Debug, Clone, Serialize)]
pub struct ModelsResponse {
    pub provider: String,
    pub generators: Vec<ModelInfo>,
    pub rerankers: Vec<ModelInfo>,
    pub classifiers: Vec<ModelInfo>,
    pub defaults: ModelDefaults,
}

/// How candidate evidence is fetched from the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Dense,
    Sparse,
    Hybrid,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Dense => "dense",
            RetrievalMode::Sparse => "sparse",
            RetrievalMode::Hybrid => "hybrid",
        }
    }

    /// Whether this mode needs query embeddings.
    pub fn uses_dense(&self) -> bool {
        matches!(self, RetrievalMode::Dense | RetrievalMode::Hybrid)
    }
}

impl FromStr for RetrievalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dense" => Ok(RetrievalMode::Dense),
            "sparse" => Ok(RetrievalMode::Sparse),
            "hybrid" => Ok(RetrievalMode::Hybrid),
            other => Err(format!(
                "unknown retrieval mode: {}. Use dense, sparse, or hybrid.",
                other
            )),
        }
    }
}

/// A normalized corpus document stored in SQLite.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub body: String,
    pub updated_at: i64,
    pub dedup_hash: String,
}

/// A chunk of a document's body text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}
