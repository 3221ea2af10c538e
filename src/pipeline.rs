//! The chat pipeline: one request in, one grounded answer out.
//!
//! ```text
//! question ──▶ classify ──▶ reformulate ──▶ retrieve ──▶ rerank ──▶ generate ──▶ assemble
//!                 │ (out_of_scope)                                                  │
//!                 └────────────────────── fixed refusal ──────────────────────────▶─┘
//! ```
//!
//! Stage failure policy, in one place:
//!
//! | stage       | on failure                                  |
//! |-------------|---------------------------------------------|
//! | classify    | default to `informational`, continue        |
//! | reformulate | use the verbatim question, continue         |
//! | retrieve    | fatal                                       |
//! | rerank      | retrieval order stands in, continue         |
//! | generate    | fatal, session left untouched               |
//!
//! A session is only ever extended by a completed exchange: the user
//! turn and the assistant turn land together, after generation
//! succeeded. A failed request leaves no trace in the transcript.

use std::time::Instant;

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{
    ChatRequest, ChatResponse, Message, ResponseType, Role, Source,
};
use crate::providers::ProviderRegistry;
use crate::session::SessionStore;
use crate::{db, generate, intent, migrate, reformulate, rerank, retrieve};

/// Fixed reply for questions outside the childcare assistance domain.
pub const OUT_OF_SCOPE_ANSWER: &str = "I can only answer questions about childcare assistance: \
eligibility, applications, copays, providers, and related topics. Please ask me something about \
childcare assistance.";

pub struct ChatPipeline {
    config: Config,
    pool: SqlitePool,
    registry: ProviderRegistry,
    sessions: SessionStore,
}

impl ChatPipeline {
    /// Run migrations, open the database, and build the provider
    /// registry. Fails fast on a misconfigured default provider.
    pub async fn initialize(config: Config) -> anyhow::Result<Self> {
        migrate::run_migrations(&config).await?;
        let pool = db::connect(&config.db).await?;
        let registry = ProviderRegistry::from_config(&config)?;
        let sessions = SessionStore::new(&config.session);

        Ok(Self {
            config,
            pool,
            registry,
            sessions,
        })
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Mutable registry access for embedding the pipeline in a larger
    /// binary that registers extra adapters before serving.
    pub fn registry_mut(&mut self) -> &mut ProviderRegistry {
        &mut self.registry
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn run(&self, request: ChatRequest) -> Result<ChatResponse, PipelineError> {
        let started = Instant::now();

        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let conversational = request
            .conversational_mode
            .unwrap_or(self.config.chat.conversational_mode);
        let history = if conversational {
            self.sessions.history(&session_id).await
        } else {
            Vec::new()
        };

        // Resolve every backend up front so an unknown or misconfigured
        // override fails before any stage runs.
        let provider_override = request.provider.as_deref();
        let classifier = self.registry.classifier(provider_override)?;
        let reformulator = self.registry.reformulator(provider_override)?;
        let reranker = self.registry.reranker(None)?;
        let generator = self.registry.generator(provider_override)?;

        let response_type = intent::classify(
            classifier,
            &request.question,
            &history,
            request.intent_model.as_deref(),
        )
        .await;

        if response_type == ResponseType::OutOfScope {
            let response = self.assemble(
                &session_id,
                OUT_OF_SCOPE_ANSWER.to_string(),
                Vec::new(),
                ResponseType::OutOfScope,
                started,
            );
            self.record_exchange(&session_id, &request.question, &response)
                .await;
            return Ok(response);
        }

        let query = reformulate::reformulate(
            reformulator,
            &request.question,
            &history,
            request.llm_model.as_deref(),
        )
        .await;
        tracing::debug!(%session_id, %query, "retrieval query");

        let candidates = retrieve::retrieve(
            &self.pool,
            self.registry.embedder().as_ref(),
            &self.config.retrieval,
            &query,
        )
        .await
        .map_err(PipelineError::Retrieval)?;

        let evidence = rerank::rerank(
            reranker,
            &query,
            candidates,
            self.config.rerank.top_n,
            request.reranker_model.as_deref(),
        )
        .await;

        let generated = generate::generate(
            generator,
            &query,
            &evidence,
            &history,
            response_type,
            request.llm_model.as_deref(),
        )
        .await
        .map_err(PipelineError::Generation)?;

        let response = self.assemble(
            &session_id,
            generated.answer,
            generated.sources,
            response_type,
            started,
        );
        self.record_exchange(&session_id, &request.question, &response)
            .await;

        tracing::info!(
            %session_id,
            response_type = response_type.as_str(),
            sources = response.sources.len(),
            elapsed = response.processing_time,
            "chat request completed"
        );
        Ok(response)
    }

    fn assemble(
        &self,
        session_id: &str,
        answer: String,
        sources: Vec<Source>,
        response_type: ResponseType,
        started: Instant,
    ) -> ChatResponse {
        let action_items = if response_type == ResponseType::NeedsAction {
            generate::action_items()
        } else {
            Vec::new()
        };

        ChatResponse {
            answer,
            sources,
            response_type,
            action_items,
            processing_time: started.elapsed().as_secs_f64(),
            session_id: session_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    async fn record_exchange(&self, session_id: &str, question: &str, response: &ChatResponse) {
        let assistant = Message {
            role: Role::Assistant,
            content: response.answer.clone(),
            sources: Some(response.sources.clone()),
            action_items: Some(response.action_items.clone()),
            response_type: Some(response.response_type),
            timestamp: Utc::now(),
            processing_time: Some(response.processing_time),
        };
        self.sessions
            .append_exchange(session_id, Message::user(question), assistant)
            .await;
    }
}
