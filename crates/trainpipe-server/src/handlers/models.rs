//! Trained model endpoints

use crate::error::ApiError;
use crate::server::AppState;
use axum::{
    extract::{rejection::JsonRejection, Multipart, Path, State},
    http::StatusCode,
    Json,
};
use tracing::{debug, info};
use trainpipe_core::config::UploadConfig;
use trainpipe_core::{CreateModelRequest, ModelRecordPatch, ModelUpload, TrainedModelRecord};

/// Models of one project, most recently updated first.
pub async fn list_project_models(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> Result<Json<Vec<TrainedModelRecord>>, ApiError> {
    Ok(Json(state.api.list_models(project_id).await?))
}

/// Create a record in a project; its artifact is uploaded separately.
pub async fn create_project_model(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    request: Result<Json<CreateModelRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TrainedModelRecord>), ApiError> {
    let Json(request) = request.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let record = state.api.create_model(project_id, request).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn get_model(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TrainedModelRecord>, ApiError> {
    Ok(Json(state.api.get_model(id).await?))
}

pub async fn update_model(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    patch: Result<Json<ModelRecordPatch>, JsonRejection>,
) -> Result<Json<TrainedModelRecord>, ApiError> {
    let Json(patch) = patch.map_err(|e| ApiError::bad_request(e.body_text()))?;
    Ok(Json(state.api.update_model(id, patch).await?))
}

/// Delete the record and its artifact.
pub async fn delete_model(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let record = state.api.delete_model(id).await?;
    info!("Deleted model {} ({})", record.id, record.name);
    Ok(StatusCode::NO_CONTENT)
}

/// Accept a TF.js head as `model.json` plus `model.weights.bin` form parts
/// and publish it as the model's artifact.
pub async fn upload_model(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> Result<Json<TrainedModelRecord>, ApiError> {
    let mut upload = ModelUpload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed reading multipart field: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let slot = match name.as_str() {
            UploadConfig::MODEL_JSON_PART => &mut upload.model_json,
            UploadConfig::WEIGHTS_PART => &mut upload.weights,
            _ => {
                debug!("Ignoring multipart field {:?}", name);
                continue;
            }
        };
        let bytes = field.bytes().await.map_err(|e| {
            ApiError::bad_request(format!("Failed reading multipart '{name}' field: {e}"))
        })?;
        *slot = Some(bytes.to_vec());
    }

    Ok(Json(state.api.upload_model(id, upload).await?))
}
