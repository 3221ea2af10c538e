//! HTTP API for the chat pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Run the full pipeline for one question |
//! | `GET`  | `/health` | Liveness plus pipeline readiness |
//! | `GET`  | `/models` | Registered backends and configured defaults |
//! | `POST` | `/sessions/{id}/clear` | Drop a session's history |
//!
//! # Error Contract
//!
//! All error responses share one schema:
//!
//! ```json
//! { "error": { "code": "unknown_provider", "message": "unknown provider 'acme' for capability 'generate'" } }
//! ```
//!
//! Codes: `bad_request` (400), `unknown_provider` (400),
//! `not_found` (404), `provider_misconfigured` (503),
//! `pipeline_error` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser clients
//! can call the API directly.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{ChatRequest, HealthResponse};
use crate::pipeline::ChatPipeline;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<ChatPipeline>,
}

/// Starts the HTTP server. Binds to `[server].bind` and runs until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pipeline = Arc::new(ChatPipeline::initialize(config.clone()).await?);

    let app = router(pipeline);

    tracing::info!("chat server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// The route table, separated from binding so tests can drive it with
/// `tower::ServiceExt` if needed.
pub fn router(pipeline: Arc<ChatPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .route("/models", get(handle_models))
        .route("/sessions/{id}/clear", post(handle_clear_session))
        .layer(cors)
        .with_state(AppState { pipeline })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match &err {
            PipelineError::UnknownProvider { .. } => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "unknown_provider".to_string(),
                message: err.to_string(),
            },
            PipelineError::MisconfiguredProvider { .. } => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "provider_misconfigured".to_string(),
                message: err.to_string(),
            },
            // Fatal stage failures (retrieval, generation) are upstream
            // failures from the caller's point of view.
            _ => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "pipeline_error".to_string(),
                message: err.to_string(),
            },
        }
    }
}

// ============ Handlers ============

async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let response = state.pipeline.run(request).await?;
    Ok(Json(response))
}

async fn handle_health(State(_state): State<AppState>) -> impl IntoResponse {
    // Reaching the handler means initialization succeeded; startup
    // aborts the process otherwise.
    Json(HealthResponse {
        status: "healthy".to_string(),
        chatbot_initialized: true,
        timestamp: Utc::now().to_rfc3339(),
        error: None,
    })
}

async fn handle_models(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pipeline.registry().models())
}

#[derive(Serialize)]
struct ClearResponse {
    session_id: String,
    cleared: bool,
}

async fn handle_clear_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !state.pipeline.sessions().clear(&session_id).await {
        return Err(not_found(format!("unknown session: {}", session_id)));
    }
    Ok(Json(ClearResponse {
        session_id,
        cleared: true,
    }))
}
