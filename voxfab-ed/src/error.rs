//! Error types for voxfab-ed
//!
//! `EditorError` is the domain taxonomy shared by the registry, the artifact
//! session, the edit channel and the dataset collector. `ApiError` maps it to
//! HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Broad error class, decides how a failure is surfaced to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid caller input
    Validation,
    /// Operation attempted without its precondition
    State,
    /// Expected file or resource missing
    NotFound,
    /// Failure inside an external collaborator or the filesystem
    External,
    /// Malformed streamed message
    Protocol,
}

/// Domain errors for editor operations
#[derive(Debug, Error)]
pub enum EditorError {
    #[error("No text provided")]
    EmptyText,

    #[error("Invalid start or end time (start={start}, end={end})")]
    InvalidRange { start: f64, end: f64 },

    #[error("Invalid adjustment delta: {0}")]
    InvalidDelta(f64),

    #[error("Invalid model name: {0:?}")]
    InvalidModelName(String),

    #[error("{0}")]
    Validation(String),

    #[error("No TTS model loaded. Please load a model first.")]
    NoModelLoaded,

    #[error("No audio file found")]
    NoArtifact,

    #[error("No backup audio available to reset to")]
    NoBackup,

    /// Model loading failed; carries the loader's diagnostic verbatim
    #[error("{0}")]
    ModelLoad(String),

    #[error("{0}")]
    Synthesis(String),

    #[error("{0}")]
    Transform(String),

    #[error("{0}")]
    Persistence(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    #[error("{0}")]
    Protocol(String),
}

impl EditorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EditorError::EmptyText
            | EditorError::InvalidRange { .. }
            | EditorError::InvalidDelta(_)
            | EditorError::InvalidModelName(_)
            | EditorError::Validation(_) => ErrorKind::Validation,
            EditorError::NoModelLoaded | EditorError::NoBackup => ErrorKind::State,
            EditorError::NoArtifact => ErrorKind::NotFound,
            EditorError::ModelLoad(_)
            | EditorError::Synthesis(_)
            | EditorError::Transform(_)
            | EditorError::Persistence(_)
            | EditorError::Timeout { .. } => ErrorKind::External,
            EditorError::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// Stable machine-readable code for response bodies
    pub fn code(&self) -> &'static str {
        match self {
            EditorError::EmptyText => "EMPTY_TEXT",
            EditorError::InvalidRange { .. } => "INVALID_RANGE",
            EditorError::InvalidDelta(_) => "INVALID_DELTA",
            EditorError::InvalidModelName(_) => "INVALID_MODEL_NAME",
            EditorError::Validation(_) => "VALIDATION_ERROR",
            EditorError::NoModelLoaded => "NO_MODEL_LOADED",
            EditorError::NoArtifact => "NO_ARTIFACT",
            EditorError::NoBackup => "NO_BACKUP",
            EditorError::ModelLoad(_) => "MODEL_LOAD_ERROR",
            EditorError::Synthesis(_) => "SYNTHESIS_ERROR",
            EditorError::Transform(_) => "TRANSFORM_ERROR",
            EditorError::Persistence(_) => "PERSISTENCE_ERROR",
            EditorError::Timeout { .. } => "TIMEOUT",
            EditorError::Protocol(_) => "PROTOCOL_ERROR",
        }
    }
}

/// Filesystem failures from the shared write helpers
impl From<voxfab_common::Error> for EditorError {
    fn from(err: voxfab_common::Error) -> Self {
        match err {
            voxfab_common::Error::Io(e) => EditorError::Persistence(e.to_string()),
            other => EditorError::Persistence(other.to_string()),
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Domain error from an editor operation
    #[error(transparent)]
    Editor(#[from] EditorError),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::Editor(err) => {
                let status = match err.kind() {
                    ErrorKind::Validation | ErrorKind::State | ErrorKind::Protocol => {
                        StatusCode::BAD_REQUEST
                    }
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::External => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.code(), err.to_string())
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, "{}", message);
        } else {
            tracing::debug!(code = error_code, "{}", message);
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for editor operations
pub type EditorResult<T> = Result<T, EditorError>;

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
