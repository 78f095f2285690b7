//! Dataset endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use crate::dataset::{casted_datasets, DatasetEntry};
use crate::engine::call_bounded;
use crate::error::{ApiError, EditorError};
use crate::{ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct EntriesResponse {
    pub model: String,
    pub entries: Vec<DatasetEntry>,
}

/// GET /api/v1/datasets/:model/entries
pub async fn list_entries(
    State(state): State<AppState>,
    Path(model): Path<String>,
) -> ApiResult<Json<EntriesResponse>> {
    let entries = state.dataset.entries(&model).await?;
    Ok(Json(EntriesResponse { model, entries }))
}

#[derive(Debug, Serialize)]
pub struct CastedResponse {
    pub casted_directories: Vec<String>,
}

/// GET /api/v1/datasets/casted
///
/// Upload directories that already contain a `casted` folder.
pub async fn list_casted(State(state): State<AppState>) -> ApiResult<Json<CastedResponse>> {
    let casted_directories = casted_datasets(&state.layout.upload_dir()).await?;
    Ok(Json(CastedResponse { casted_directories }))
}

/// POST /api/v1/datasets/validate_csv
///
/// Runs the validator over the fixed upload location and relays its report
/// with the status code it chose.
pub async fn validate_csv(State(state): State<AppState>) -> ApiResult<Response> {
    let upload_dir = state.layout.upload_dir();
    info!(dir = %upload_dir.display(), "Validating dataset CSV");

    let report = call_bounded(
        "csv validation",
        state.config.timeouts.dataset(),
        state.collaborators.validator.validate_csv(&upload_dir),
        EditorError::Validation,
    )
    .await
    .map_err(|err| match err {
        // The validator itself failing is not a caller fault
        EditorError::Validation(msg) => ApiError::Internal(msg),
        other => ApiError::Editor(other),
    })?;

    let status = StatusCode::from_u16(report.status_code).map_err(|_| {
        ApiError::Internal(format!(
            "validator returned invalid status {}",
            report.status_code
        ))
    })?;
    Ok((status, Json(report.body)).into_response())
}

pub fn dataset_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/datasets/casted", get(list_casted))
        .route("/api/v1/datasets/:model/entries", get(list_entries))
        .route("/api/v1/datasets/validate_csv", post(validate_csv))
}
