//! Working-artifact endpoints: generate, fetch, crop, reset and keep

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use crate::session::SessionSnapshot;
use crate::{ApiResult, AppState, EditorError};

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub message: String,
    pub session: SessionSnapshot,
}

/// POST /api/v1/generate
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let model = state.registry.active();
    let session = state.session.generate(model, &request.text).await?;
    Ok(Json(SessionResponse {
        message: "Audio generated successfully".to_string(),
        session,
    }))
}

/// GET /api/v1/audio
///
/// Streams the current artifact as `audio/wav`.
pub async fn current_audio(State(state): State<AppState>) -> ApiResult<Response> {
    let file = state.session.current_audio().await?;
    let length = file.metadata().await?.len();
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        [
            (header::CONTENT_TYPE, "audio/wav".to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        body,
    )
        .into_response())
}

/// GET /api/v1/session
pub async fn session_state(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot().await)
}

#[derive(Debug, Deserialize)]
pub struct ChopRequest {
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
}

/// POST /api/v1/chop
pub async fn chop(
    State(state): State<AppState>,
    Json(request): Json<ChopRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let (Some(start), Some(end)) = (request.start, request.end) else {
        return Err(EditorError::Validation("Invalid start or end time".to_string()).into());
    };
    let session = state.session.chop(start, end).await?;
    Ok(Json(SessionResponse {
        message: format!("Audio cropped to {}s - {}s", start, end),
        session,
    }))
}

/// POST /api/v1/reset
pub async fn reset(State(state): State<AppState>) -> ApiResult<Json<SessionResponse>> {
    let session = state.session.reset().await?;
    Ok(Json(SessionResponse {
        message: "Audio reset to the generated take".to_string(),
        session,
    }))
}

#[derive(Debug, Deserialize)]
pub struct KeepRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub model_name: String,
}

#[derive(Debug, Serialize)]
pub struct KeepResponse {
    pub status: String,
    pub filename: String,
    pub text: String,
}

/// POST /api/v1/keep
pub async fn keep(
    State(state): State<AppState>,
    Json(request): Json<KeepRequest>,
) -> ApiResult<Json<KeepResponse>> {
    let entry = state
        .session
        .keep(&state.dataset, &request.text, &request.model_name)
        .await?;
    Ok(Json(KeepResponse {
        status: "success".to_string(),
        filename: entry.filename,
        text: entry.text,
    }))
}

pub fn artifact_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/generate", post(generate))
        .route("/api/v1/audio", get(current_audio))
        .route("/api/v1/session", get(session_state))
        .route("/api/v1/chop", post(chop))
        .route("/api/v1/reset", post(reset))
        .route("/api/v1/keep", post(keep))
}
