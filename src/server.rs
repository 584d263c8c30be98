//! HTTP API over the pipeline.
//!
//! # Endpoints
//!
//! | Method   | Path              | Description |
//! |----------|-------------------|-------------|
//! | `GET`    | `/health`         | Health check (version and live corpus counts) |
//! | `POST`   | `/upload`         | Ingest a PDF sent as the raw request body |
//! | `POST`   | `/query`          | `{ "query", "session_id"? }` → `{ "response" }` (always 200) |
//! | `DELETE` | `/delete`         | Drop the corpus and all sessions |
//! | `GET`    | `/sessions`       | List active session ids |
//! | `DELETE` | `/sessions/{id}`  | Drop one session |
//! | `POST`   | `/summary`        | Whole-document summary of the corpus |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "no_documents", "message": "No documents uploaded. ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `no_documents` (409), `not_found` (404),
//! `ingestion_failed` (422), `retrieval_failed` / `generation_failed` (502),
//! `internal` (500).
//!
//! `/query` reports pipeline failures (including "no documents uploaded") in
//! its `response` text rather than as an error status.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser-based clients.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::UploadSummary;
use crate::pipeline::Pipeline;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Build the router. Exposed separately from [`run_server`] so callers can
/// embed it or add layers.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let max_upload = pipeline.config().server.max_upload_bytes;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/upload", post(handle_upload))
        .route("/query", post(handle_query))
        .route("/delete", delete(handle_delete))
        .route("/sessions", get(handle_list_sessions))
        .route("/sessions/{id}", delete(handle_delete_session))
        .route("/summary", post(handle_summary))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(cors)
        .with_state(pipeline)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let bind_addr = pipeline.config().server.bind.clone();
    tokio::fs::create_dir_all(&pipeline.config().server.upload_dir).await?;

    let app = router(pipeline);

    println!("paperchat listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
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

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::NoDocuments => StatusCode::CONFLICT,
            PipelineError::Ingestion(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Retrieval(_) | PipelineError::Generation(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
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

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    corpus_loaded: bool,
    corpus: Option<UploadSummary>,
}

async fn handle_health(State(pipeline): State<Arc<Pipeline>>) -> Json<HealthResponse> {
    let corpus = pipeline.corpus();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        corpus_loaded: corpus.is_some(),
        corpus: corpus.map(|c| c.stats().clone()),
    })
}

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    summary: UploadSummary,
}

/// Handler for `POST /upload`.
///
/// The body is the PDF itself. It is written to the upload directory,
/// ingested, and removed whether or not ingestion succeeds.
async fn handle_upload(
    State(pipeline): State<Arc<Pipeline>>,
    body: Bytes,
) -> Result<Json<UploadResponse>, AppError> {
    if body.is_empty() {
        return Err(bad_request("request body must contain a PDF document"));
    }
    if !body.starts_with(PDF_MAGIC) {
        return Err(bad_request("uploaded file is not a PDF"));
    }

    let upload_dir = &pipeline.config().server.upload_dir;
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| internal(format!("failed to prepare upload directory: {}", e)))?;
    let path = upload_dir.join(format!("{}.pdf", Uuid::new_v4()));
    tokio::fs::write(&path, &body)
        .await
        .map_err(|e| internal(format!("failed to store upload: {}", e)))?;

    info!(bytes = body.len(), path = %path.display(), "upload received");
    let result = pipeline.upload(&path).await;
    if let Err(e) = tokio::fs::remove_file(&path).await {
        warn!(error = %e, path = %path.display(), "failed to remove upload");
    }

    let summary = result?;
    Ok(Json(UploadResponse {
        message: "File processed successfully".to_string(),
        summary,
    }))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct QueryResponse {
    response: String,
}

async fn handle_query(
    State(pipeline): State<Arc<Pipeline>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let session_id = req.session_id.as_deref().filter(|s| !s.trim().is_empty());
    let response = pipeline.query(&req.query, session_id).await;
    Ok(Json(QueryResponse { response }))
}

// ============ DELETE /delete ============

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_delete(State(pipeline): State<Arc<Pipeline>>) -> Json<MessageResponse> {
    pipeline.clear();
    Json(MessageResponse {
        message: "Corpus and sessions cleared".to_string(),
    })
}

// ============ Sessions ============

#[derive(Serialize)]
struct SessionsResponse {
    sessions: Vec<String>,
}

async fn handle_list_sessions(State(pipeline): State<Arc<Pipeline>>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: pipeline.sessions().session_ids(),
    })
}

async fn handle_delete_session(
    State(pipeline): State<Arc<Pipeline>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    if !pipeline.sessions().clear(&id) {
        return Err(not_found(format!("session not found: {}", id)));
    }
    Ok(Json(MessageResponse {
        message: format!("Session {} cleared", id),
    }))
}

// ============ POST /summary ============

#[derive(Serialize)]
struct SummaryResponse {
    summary: String,
}

async fn handle_summary(
    State(pipeline): State<Arc<Pipeline>>,
) -> Result<Json<SummaryResponse>, AppError> {
    let summary = pipeline.summarize().await?;
    Ok(Json(SummaryResponse { summary }))
}
