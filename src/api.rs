//! HTTP routes for project terminals, session control and output streams.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
    routing::{delete, get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use futures::StreamExt;
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    error::{TerminalError, TerminalResult},
    gateway::ViewerStream,
    manager::SessionManager,
    projects::ProjectDirectory,
};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    pub projects: Arc<dyn ProjectDirectory>,
}

impl AppState {
    pub fn new(manager: SessionManager, projects: Arc<dyn ProjectDirectory>) -> Self {
        Self { manager, projects }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/projects/reload", post(reload_projects))
        .route(
            "/api/projects/:project/terminal",
            get(find_project_session).post(open_project_session),
        )
        .route("/api/terminal", get(stream_terminal))
        .route("/api/terminal/sessions", get(list_sessions))
        .route("/api/terminal/:session_id", delete(kill_session))
        .route("/api/terminal/:session_id/input", post(send_input))
        .route("/api/terminal/:session_id/resize", post(resize_session))
        .route("/api/terminal/:session_id/capture", get(capture_session))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.manager.session_count()
    }))
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "sessions": state.manager.list() }))
}

async fn reload_projects(State(state): State<AppState>) -> impl IntoResponse {
    let count = state.projects.reload();
    info!("[http] Project catalog reloaded: {} projects", count);
    Json(serde_json::json!({ "projects": count }))
}

async fn open_project_session(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> TerminalResult<impl IntoResponse> {
    info!("[http] POST /api/projects/{}/terminal", project);

    let session_id = match state.manager.find_by_owner(&project) {
        Some(id) => id,
        None => {
            let cwd = state.projects.source_directory(&project)?;
            state.manager.get_or_create(&project, &cwd)?
        }
    };

    Ok(Json(serde_json::json!({ "session_id": session_id })))
}

async fn find_project_session(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> impl IntoResponse {
    Json(serde_json::json!({ "session_id": state.manager.find_by_owner(&project) }))
}

#[derive(Debug, Deserialize)]
struct InputRequest {
    data: String,
}

async fn send_input(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<InputRequest>,
) -> TerminalResult<impl IntoResponse> {
    state.manager.write(&session_id, request.data.as_bytes())?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "bytes": request.data.len()
    })))
}

#[derive(Debug, Deserialize)]
struct ResizeRequest {
    cols: u16,
    rows: u16,
}

async fn resize_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ResizeRequest>,
) -> TerminalResult<impl IntoResponse> {
    if request.cols == 0 || request.rows == 0 {
        return Err(TerminalError::InvalidRequest(format!(
            "terminal size must be non-zero, got {}x{}",
            request.cols, request.rows
        )));
    }
    state
        .manager
        .resize(&session_id, request.cols, request.rows);
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn kill_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    info!("[http] DELETE /api/terminal/{}", session_id);
    state.manager.kill(&session_id);
    Json(serde_json::json!({ "status": "terminated", "id": session_id }))
}

async fn capture_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> TerminalResult<impl IntoResponse> {
    let scrollback = state
        .manager
        .scrollback(&session_id)
        .ok_or(TerminalError::SessionNotFound(session_id))?;
    Ok(Json(serde_json::json!({
        "data": STANDARD.encode(&scrollback),
        "length": scrollback.len()
    })))
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Server-Sent Events feed of one session's output.
async fn stream_terminal(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> TerminalResult<impl IntoResponse> {
    let session_id = params
        .session_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| TerminalError::InvalidRequest("Missing sessionId".to_string()))?;

    let frames = ViewerStream::open(&state.manager, &session_id)
        .map(|frame| Ok::<Event, Infallible>(frame.into_event()));

    Ok(Sse::new(frames).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}
