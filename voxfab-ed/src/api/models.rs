//! Model activation endpoints

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::registry::ActivationResult;
use crate::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ActivateQuery {
    #[serde(default)]
    pub folder_name: String,
}

#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    pub message: String,
    pub result: ActivationResult,
}

/// GET /api/v1/model?folder_name=
///
/// Make the named model folder the active model.
pub async fn activate_model(
    State(state): State<AppState>,
    Query(query): Query<ActivateQuery>,
) -> ApiResult<Json<ActivateResponse>> {
    info!(folder = %query.folder_name, "Model activation requested");
    let result = state.registry.activate(&query.folder_name).await?;

    Ok(Json(ActivateResponse {
        message: result.message(query.folder_name.trim()),
        result,
    }))
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    /// Model folders under the models root
    pub available: Vec<String>,
    /// Live cache entries, oldest first
    pub cached: Vec<String>,
    pub active: Option<String>,
}

/// GET /api/v1/models
pub async fn list_models(State(state): State<AppState>) -> ApiResult<Json<ModelsResponse>> {
    let available = state.registry.available_models().await?;
    Ok(Json(ModelsResponse {
        available,
        cached: state.registry.cached_models(),
        active: state.registry.active().map(|m| m.folder_name.clone()),
    }))
}

pub fn model_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/model", get(activate_model))
        .route("/api/v1/models", get(list_models))
}
