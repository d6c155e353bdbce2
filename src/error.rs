use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("Invalid working directory: {}", .0.display())]
    DirectoryInvalid(PathBuf),

    #[error("Failed to spawn PTY: {0}")]
    SpawnFailed(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("No source directory set for project {0}")]
    NoSourceDirectory(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TerminalError {
    pub fn status(&self) -> StatusCode {
        match self {
            TerminalError::SessionNotFound(_) | TerminalError::ProjectNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            TerminalError::DirectoryInvalid(_)
            | TerminalError::NoSourceDirectory(_)
            | TerminalError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            TerminalError::SpawnFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TerminalError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

pub type TerminalResult<T> = Result<T, TerminalError>;
