// src/api.rs
//! HTTP surface: submit / poll / list tasks, plus health.

use serde::Deserialize;
use serde_json::{json, Value};
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::tasks::{Orchestrator, TaskInput};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/tasks", get(list_tasks).post(submit_task))
        .route("/tasks/{id}", get(poll_task))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Error body: `{"error": "..."}`.
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

fn internal(e: anyhow::Error) -> ApiError {
    tracing::error!(target: "tasks", error = %format!("{e:#}"), "request failed");
    ApiError(StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
}

#[derive(Deserialize)]
struct SubmitReq {
    kind: String,
    #[serde(default)]
    input: Value,
}

async fn submit_task(
    State(state): State<AppState>,
    Json(body): Json<SubmitReq>,
) -> Result<Response, ApiError> {
    if body.kind.trim().is_empty() {
        return Err(ApiError(StatusCode::BAD_REQUEST, "kind must not be empty".into()));
    }
    let input = TaskInput::from_parts(&body.kind, body.input)
        .map_err(|e| ApiError(StatusCode::BAD_REQUEST, format!("{e:#}")))?;
    let ticket = state
        .orchestrator
        .submit_and_spawn(input)
        .await
        .map_err(internal)?;
    Ok((StatusCode::ACCEPTED, Json(ticket)).into_response())
}

async fn poll_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.orchestrator.poll(&id).await.map_err(internal)? {
        Some(view) => Ok(Json(view).into_response()),
        None => Err(ApiError(StatusCode::NOT_FOUND, format!("task {id} not found"))),
    }
}

#[derive(Deserialize)]
struct ListQuery {
    kind: Option<String>,
    limit: Option<usize>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let tasks = state
        .orchestrator
        .list(q.kind.as_deref(), q.limit)
        .await
        .map_err(internal)?;
    Ok(Json(tasks).into_response())
}
