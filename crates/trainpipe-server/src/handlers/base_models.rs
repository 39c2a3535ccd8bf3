//! Base model catalog endpoint

use crate::error::ApiError;
use crate::server::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use trainpipe_core::ModelTask;

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    pub task: Option<ModelTask>,
}

/// Names of installed base models, optionally filtered by task.
pub async fn list_installed(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.api.installed_base_models(query.task).await?))
}
