use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;

use crate::db::DbHandle;
use crate::errors::InvalidProjectId;
use crate::llm::Role;
use crate::project::ProjectId;
use crate::queue::Dispatcher;
use crate::status::StatusStore;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub dispatcher: Arc<Dispatcher>,
    pub status: Arc<dyn StatusStore>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SpawnRequest {
    #[serde(default)]
    pub activate: bool,
}

#[derive(Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<InvalidProjectId> for ApiError {
    fn from(err: InvalidProjectId) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    tracing::error!(error = %format!("{err:#}"), "request failed");
    ApiError::Internal(format!("{err:#}"))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/projects/{id}/spawn", post(spawn_project))
        .route("/api/projects/{id}/prompt", post(submit_prompt))
        .route("/api/projects/{id}/status", get(get_status))
        .route("/api/projects/{id}/url", get(get_url))
        .route("/api/projects/{id}/prompts", get(list_prompts))
        .route("/api/projects/{id}/actions", get(list_actions))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn spawn_project(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<SpawnRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let project = ProjectId::new(id)?;
    let job = state
        .dispatcher
        .enqueue(&project, req.activate)
        .await
        .map_err(internal)?;
    Ok((StatusCode::ACCEPTED, Json(json!({"job_id": job.id}))))
}

async fn submit_prompt(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<PromptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let project = ProjectId::new(id)?;
    if req.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("Prompt must not be empty".into()));
    }

    let turn_project = project.clone();
    state
        .db
        .call(move |db| db.append_turn(&turn_project, Role::User, &req.prompt))
        .await
        .map_err(internal)?;
    let job = state
        .dispatcher
        .enqueue(&project, false)
        .await
        .map_err(internal)?;
    Ok((StatusCode::ACCEPTED, Json(json!({"job_id": job.id}))))
}

async fn get_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let project = ProjectId::new(id)?;
    let status = state.status.status(&project).await.map_err(internal)?;
    Ok(Json(json!({"status": status})))
}

async fn get_url(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let project = ProjectId::new(id)?;
    let url = state.status.url(&project).await.map_err(internal)?;
    Ok(Json(json!({"url": url})))
}

async fn list_prompts(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let project = ProjectId::new(id)?;
    let prompts = state
        .db
        .call(move |db| db.list_prompts(&project))
        .await
        .map_err(internal)?;
    Ok(Json(prompts))
}

async fn list_actions(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let project = ProjectId::new(id)?;
    let actions = state
        .db
        .call(move |db| db.list_actions(&project))
        .await
        .map_err(internal)?;
    Ok(Json(actions))
}

// ── Tests ─────────────────────────────────────────────────────────────
