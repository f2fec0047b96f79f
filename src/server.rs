//! HTTP boundary (feature `server`).
//!
//! | Method | Path                         | Purpose                          |
//! |--------|------------------------------|----------------------------------|
//! | GET    | `/`                          | service banner                   |
//! | GET    | `/health`                    | liveness                         |
//! | POST   | `/api/v1/upload`             | multipart `file` → new task      |
//! | GET    | `/api/v1/status/{task_id}`   | task snapshot, 404 when unknown  |
//! | GET    | `/api/v1/history?limit=`     | most-recent-first history        |
//! | GET    | `/api/v1/stats`              | task counts                      |
//!
//! Every error is a JSON body `{ "detail": ..., "error_code": "HTTP_<status>" }`.
//! Handlers only validate, persist the upload and hand off to the
//! [`Orchestrator`]; processing happens in the background.

use crate::error::{SubmitError, ValidationError};
use crate::orchestrator::{Orchestrator, Upload};
use crate::storage::{clear_directory, validate_upload, UploadWriter};
use crate::store::StoreStats;
use crate::task::{HistoryEntry, ProcessingResult, TaskId, TaskStatus};
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const SERVICE_NAME: &str = "PDF Summarizer API";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// How often finished tasks past their TTL are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Listener and middleware settings.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub bind: SocketAddr,
    /// Allowed CORS origins; `"*"` allows any.
    pub cors_origins: Vec<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}

// ── Responses ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: u8,
    pub result: Option<ProcessingResult>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub documents: Vec<HistoryEntry>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// An error rendered as `{detail, error_code}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "detail": self.detail,
            "error_code": format!("HTTP_{}", self.status.as_u16()),
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        let status = match e {
            ValidationError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, e.to_string())
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Validation(v) => v.into(),
            other => {
                warn!(error = %other, "upload failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::new(e.status(), e.body_text())
    }
}

// ── Router ───────────────────────────────────────────────────────────────

/// Build the application router around a shared orchestrator.
pub fn router(orchestrator: Orchestrator, options: &ServerOptions) -> Router {
    let body_limit = usize::try_from(orchestrator.config().max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/v1/upload", post(upload))
        .route("/api/v1/status/{task_id}", get(status))
        .route("/api/v1/history", get(history))
        .route("/api/v1/stats", get(stats))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(&options.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": SERVICE_NAME,
        "version": VERSION,
        "health": "/health",
    }))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: VERSION.to_string(),
        timestamp: Utc::now(),
    })
}

async fn upload(
    State(orchestrator): State<Orchestrator>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let config = orchestrator.config().clone();

    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = validate_upload(field.file_name(), field.content_type(), &config)?;

        let mut writer =
            UploadWriter::create(&config.upload_dir, &filename, config.max_file_size).await?;
        while let Some(chunk) = field.chunk().await? {
            writer.write_chunk(&chunk).await?;
        }
        let stored = writer.finish().await?;
        info!(filename = %filename, bytes = stored.size, path = %stored.path.display(), "upload stored");

        let task_id = match orchestrator.submit(Upload {
            filename,
            path: stored.path.clone(),
            size: stored.size,
        }) {
            Ok(id) => id,
            Err(e) => {
                discard_upload(&stored.path).await;
                return Err(SubmitError::from(e).into());
            }
        };

        return Ok(Json(UploadResponse {
            task_id,
            status: TaskStatus::Processing,
            message: "PDF uploaded successfully. Processing started.".to_string(),
        }));
    }

    Err(ValidationError::MissingFile.into())
}

/// Remove a stored upload that no task will ever own.
async fn discard_upload(path: &std::path::Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to remove orphaned upload");
            false
        }
    }
}

async fn status(
    State(orchestrator): State<Orchestrator>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let id = TaskId::from(task_id);
    let task = orchestrator
        .store()
        .get(&id)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Task {id} not found")))?;

    Ok(Json(TaskStatusResponse {
        task_id: task.id,
        status: task.status,
        progress: task.progress,
        result: task.result,
        error: task.error,
    }))
}

async fn history(
    State(orchestrator): State<Orchestrator>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let documents = orchestrator.store().history(query.limit);
    Json(HistoryResponse {
        total: documents.len(),
        documents,
    })
}

async fn stats(State(orchestrator): State<Orchestrator>) -> Json<StoreStats> {
    Json(orchestrator.store().stats())
}

// ── Serving ──────────────────────────────────────────────────────────────

/// Run the service until Ctrl-C / SIGTERM.
///
/// Upload and temp directories are created up front and emptied after the
/// listener has drained. Finished tasks older than the configured TTL are
/// swept hourly.
pub async fn serve(orchestrator: Orchestrator, options: ServerOptions) -> std::io::Result<()> {
    let config = orchestrator.config().clone();
    tokio::fs::create_dir_all(&config.upload_dir).await?;
    tokio::fs::create_dir_all(&config.temp_dir).await?;
    info!(
        upload_dir = %config.upload_dir.display(),
        temp_dir = %config.temp_dir.display(),
        "starting {SERVICE_NAME} v{VERSION}"
    );

    let sweeper = {
        let store = orchestrator.store().clone();
        let hours = i64::try_from(config.task_ttl_hours).unwrap_or(i64::MAX);
        let ttl = chrono::Duration::try_hours(hours).unwrap_or(chrono::Duration::MAX);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = store.sweep_finished(ttl);
                if removed > 0 {
                    info!(removed, "swept finished tasks");
                }
            }
        })
    };

    let app = router(orchestrator, &options);
    let listener = tokio::net::TcpListener::bind(options.bind).await?;
    info!(addr = %listener.local_addr()?, "listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.abort();
    info!("shutting down, cleaning up files");
    for dir in [&config.upload_dir, &config.temp_dir] {
        if let Err(e) = clear_directory(dir).await {
            warn!(dir = %dir.display(), error = %e, "cleanup failed");
        }
    }
    served
}

/// Wait for Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
