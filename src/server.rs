//! HTTP API.
//!
//! Registration returns immediately; the pipeline runs on the
//! [`WorkerPool`]. Read endpoints go straight to the [`Workflow`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/process` | Register a URL (`{"url", "force_process"}`) and schedule processing |
//! | `GET`  | `/process` | List registered documents |
//! | `GET`  | `/tasks?filter=&include_retried=` | List task rows |
//! | `GET`  | `/summary/{hash}` | Stored summary |
//! | `GET`  | `/entities/{hash}` | Stored entity relations |
//! | `POST` | `/tasks/{hash}/{task_name}/retry` | Re-run one finished task |
//! | `POST` | `/tasks/{task_id}/cancel` | Cancel a queued or running task |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "document not found: 0badc0de" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `busy` (503), `internal` (500).

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::error::DocflowError;
use crate::models::{EntityRelation, StatusClass, TaskRegistration};
use crate::tasks::TaskQuery;
use crate::worker::WorkerPool;
use crate::workflow::{DocumentSummary, Registration, SummaryView, Workflow};

#[derive(Clone)]
struct AppState {
    workflow: Workflow,
    workers: Arc<WorkerPool>,
}

/// Start the worker pool and serve the API on `[server].bind` until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let workflow = Workflow::from_config(config).await?;
    let workers = WorkerPool::start(workflow.clone(), &config.worker).await?;
    let app = router(workflow, Arc::new(workers));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "docflow server listening");
    println!("docflow server listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router. Exposed for tests that serve on an ephemeral port.
pub fn router(workflow: Workflow, workers: Arc<WorkerPool>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/process", post(handle_process).get(handle_documents))
        .route("/tasks", get(handle_tasks))
        .route("/summary/{hash}", get(handle_summary))
        .route("/entities/{hash}", get(handle_entities))
        .route("/tasks/{hash}/{task_name}/retry", post(handle_retry))
        .route("/tasks/{task_id}/cancel", post(handle_cancel))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { workflow, workers })
}

// ═══════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════

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

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
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
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

/// Map workflow errors onto HTTP status codes by variant.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        match err.downcast_ref::<DocflowError>() {
            Some(DocflowError::NotFound { .. }) => {
                AppError::new(StatusCode::NOT_FOUND, "not_found", message)
            }
            Some(DocflowError::UnsupportedUrl(_)) => bad_request(message),
            Some(DocflowError::InvalidTransition { .. })
            | Some(DocflowError::DuplicateRegistration { .. }) => {
                AppError::new(StatusCode::CONFLICT, "conflict", message)
            }
            Some(DocflowError::QueueFull) => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "busy", message)
            }
            _ => {
                error!(error = %message, "request failed");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Handlers
// ═══════════════════════════════════════════════════════════════════════

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

#[derive(Deserialize)]
struct ProcessRequest {
    url: String,
    #[serde(default, alias = "force")]
    force_process: bool,
}

async fn handle_process(
    State(state): State<AppState>,
    Json(req): Json<ProcessRequest>,
) -> Result<Json<Registration>, AppError> {
    if req.url.trim().is_empty() {
        return Err(bad_request("url must not be empty"));
    }
    let (registration, job) = state
        .workflow
        .register_url(&req.url, req.force_process)
        .await?;
    if let Some(job) = job {
        state.workers.submit(job).await?;
    }
    Ok(Json(registration))
}

#[derive(Deserialize, Default)]
struct TasksParams {
    /// Comma-separated status classes: pending, complete, failed, cancelled.
    filter: Option<String>,
    #[serde(default)]
    include_retried: bool,
}

#[derive(Serialize)]
struct TasksResponse {
    tasks: Vec<TaskRegistration>,
}

/// Parse a comma-separated status class filter. Blank means all.
pub fn parse_filter(filter: Option<&str>) -> Result<Vec<StatusClass>, String> {
    let Some(filter) = filter else {
        return Ok(Vec::new());
    };
    filter
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<StatusClass>)
        .collect()
}

async fn handle_tasks(
    State(state): State<AppState>,
    Query(params): Query<TasksParams>,
) -> Result<Json<TasksResponse>, AppError> {
    let classes = parse_filter(params.filter.as_deref()).map_err(bad_request)?;
    let query = TaskQuery {
        classes,
        include_retried: params.include_retried,
        hash: None,
    };
    let tasks = state.workflow.list_tasks(&query).await?;
    Ok(Json(TasksResponse { tasks }))
}

async fn handle_documents(
    State(state): State<AppState>,
) -> Result<Json<Vec<DocumentSummary>>, AppError> {
    Ok(Json(state.workflow.list_documents().await?))
}

async fn handle_summary(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<SummaryView>, AppError> {
    Ok(Json(state.workflow.summary(&hash).await?))
}

async fn handle_entities(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<Vec<EntityRelation>>, AppError> {
    Ok(Json(state.workflow.entities(&hash).await?))
}

#[derive(Serialize)]
struct TaskIdResponse {
    task_id: String,
}

async fn handle_retry(
    State(state): State<AppState>,
    Path((hash, task_name)): Path<(String, String)>,
) -> Result<Json<TaskIdResponse>, AppError> {
    let job = state.workflow.schedule_retry(&hash, &task_name).await?;
    let task_id = job.task_ids().into_iter().next().unwrap_or_default();
    state.workers.submit(job).await?;
    Ok(Json(TaskIdResponse { task_id }))
}

#[derive(Serialize)]
struct CancelResponse {
    task_id: String,
    cancelled: bool,
}

async fn handle_cancel(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let cancelled = state.workflow.cancel(&task_id).await?;
    Ok(Json(CancelResponse { task_id, cancelled }))
}
