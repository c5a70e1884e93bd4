//! HTTP surface.
//!
//! Thin transport over the core: build control, status polling, the streamed
//! chat answer (server-sent events), and conversation history. All origins
//! are permitted so browser clients can talk to a locally running instance.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/build` | Submit a background index build (fire-and-forget) |
//! | `GET`  | `/build/status` | Poll the build job state |
//! | `POST` | `/build/cancel` | Request cooperative cancellation |
//! | `POST` | `/chat` | Ask a question; streams the answer as SSE |
//! | `GET`  | `/chat/history/{thread_id}` | Sender/text pairs, chronological |
//! | `GET`  | `/chat/threads` | Threads, latest first, titled by last message |
//! | `GET`  | `/health` | Health check (returns version) |

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::builder::{BuildState, IndexBuilder};
use crate::chat::{AnswerEvent, ChatEngine};
use crate::config::Config;
use crate::conversation::{ConversationStore, HistoryEntry, ThreadSummary};
use crate::db;
use crate::embedding;
use crate::error::Error;
use crate::generation::OllamaGenerator;
use crate::migrate;
use crate::retrieve::Retriever;

#[derive(Clone)]
struct AppState {
    builder: Arc<IndexBuilder>,
    chat: ChatEngine,
    store: ConversationStore,
}

/// Start the HTTP server on `[server].bind`. Runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let config = Arc::new(config.clone());

    let pool = db::connect(&config).await?;
    migrate::run_migrations(&pool).await?;
    let store = ConversationStore::new(pool);

    let embedder = embedding::create_embedder(&config.embedding)?;
    let builder = Arc::new(IndexBuilder::new(config.clone(), embedder.clone()));
    let retriever = Arc::new(Retriever::new(
        config.storage.index_path.clone(),
        embedder,
        config.retrieval.top_k,
    ));
    let generator = Arc::new(OllamaGenerator::new(&config.generation));
    let chat = ChatEngine::new(store.clone(), retriever, generator);

    let state = AppState {
        builder,
        chat,
        store,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/build", post(handle_submit_build))
        .route("/build/status", get(handle_build_status))
        .route("/build/cancel", post(handle_build_cancel))
        .route("/chat", post(handle_chat))
        .route("/chat/history/{thread_id}", get(handle_history))
        .route("/chat/threads", get(handle_threads))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!(bind = %config.server.bind, "docuchat server listening");

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
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

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "build_in_progress".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /build ============

#[derive(Deserialize)]
struct BuildRequest {
    path: PathBuf,
}

#[derive(Serialize)]
struct BuildAccepted {
    status: String,
}

async fn handle_submit_build(
    State(state): State<AppState>,
    Json(req): Json<BuildRequest>,
) -> Result<(StatusCode, Json<BuildAccepted>), AppError> {
    match state.builder.submit(req.path) {
        Ok(()) => Ok((
            StatusCode::ACCEPTED,
            Json(BuildAccepted {
                status: "accepted".to_string(),
            }),
        )),
        Err(Error::BuildInProgress) => Err(conflict("a build is already in progress")),
        Err(e) => Err(internal(e.to_string())),
    }
}

// ============ GET /build/status ============

async fn handle_build_status(State(state): State<AppState>) -> Json<BuildState> {
    Json(state.builder.status())
}

// ============ POST /build/cancel ============

#[derive(Serialize)]
struct CancelResponse {
    status: String,
}

async fn handle_build_cancel(State(state): State<AppState>) -> Json<CancelResponse> {
    state.builder.request_cancel();
    Json(CancelResponse {
        status: "cancel_requested".to_string(),
    })
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    thread_id: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    if req.thread_id.trim().is_empty() {
        return Err(bad_request("thread_id must not be empty"));
    }

    let rx = state
        .chat
        .stream_answer(&req.message, &req.thread_id)
        .await
        .map_err(|e| internal(e.to_string()))?;

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| {
            let sse_event = match event {
                AnswerEvent::Token(text) => Event::default().data(text),
                AnswerEvent::Error(message) => Event::default().event("error").data(message),
            };
            (Ok(sse_event), rx)
        })
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ============ GET /chat/history/{thread_id} ============

#[derive(Deserialize)]
struct HistoryParams {
    #[serde(default = "default_history_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_history_limit() -> i64 {
    50
}

async fn handle_history(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    let history = state
        .store
        .list_messages(&thread_id, params.limit, params.offset)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(history))
}

// ============ GET /chat/threads ============

async fn handle_threads(
    State(state): State<AppState>,
) -> Result<Json<Vec<ThreadSummary>>, AppError> {
    let threads = state
        .store
        .list_threads_with_latest_title()
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(threads))
}
