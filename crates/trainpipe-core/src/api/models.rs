//! Trained model record methods on TrainpipeApi.

use crate::cancel::CancellationToken;
use crate::config::UploadConfig;
use crate::error::{IoResultExt, Result, TrainpipeError};
use crate::export::{validate_input_shape, ModelUpload, UploadSources};
use crate::platform::run_blocking;
use crate::store::{CreateModelRequest, ModelRecordPatch, NewModelRecord, TrainedModelRecord};
use crate::training::validate_model_name;
use crate::TrainpipeApi;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl TrainpipeApi {
    /// Models of a project, most recently updated first.
    pub async fn list_models(&self, project_id: i64) -> Result<Vec<TrainedModelRecord>> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.list_for_project(project_id)).await
    }

    pub async fn get_model(&self, id: i64) -> Result<TrainedModelRecord> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.get(id))
            .await?
            .ok_or_else(|| not_found(id))
    }

    /// Create a record in `project_id` whose artifact arrives later through
    /// [`TrainpipeApi::upload_model`].
    pub async fn create_model(
        &self,
        project_id: i64,
        request: CreateModelRequest,
    ) -> Result<TrainedModelRecord> {
        validate_model_name(&request.name)?;
        if request.base_model.trim().is_empty() {
            return Err(TrainpipeError::validation(
                "base_model",
                "base model must not be empty",
            ));
        }
        if !self.orchestrator.project_exists(project_id).await? {
            return Err(TrainpipeError::NotFound {
                entity: "project",
                id: project_id.to_string(),
            });
        }
        if self.orchestrator.is_reserved(&request.name) {
            return Err(TrainpipeError::validation(
                "name",
                format!("a model named {:?} is already being trained", request.name),
            ));
        }

        let record = NewModelRecord {
            project_id,
            name: request.name,
            model_type: request.model_type,
            base_model: request.base_model,
            model_path: String::new(),
        };
        let store = Arc::clone(&self.store);
        let created = run_blocking(move || store.create(record)).await?;
        info!(
            "Created model {} ({}) in project {}",
            created.id, created.name, project_id
        );
        Ok(created)
    }

    /// Compose an uploaded TF.js head with the record's base model, compile
    /// it and publish it as the record's artifact.
    ///
    /// A previous artifact under another file name is removed once the new
    /// one is in place.
    pub async fn upload_model(&self, id: i64, upload: ModelUpload) -> Result<TrainedModelRecord> {
        let (model_json, weights) = upload.into_parts()?;
        let record = self.get_model(id).await?;

        let registry = Arc::clone(&self.registry);
        let base_model = record.base_model.clone();
        let entry = run_blocking(move || registry.entry(&base_model))
            .await?
            .ok_or_else(|| TrainpipeError::BaseModelNotFound {
                name: record.base_model.clone(),
            })?;
        let input_shape = entry.extra.get(UploadConfig::INPUT_SHAPE_KEY);
        validate_input_shape(&record.base_model, input_shape)?;
        let input_shape = input_shape.cloned().unwrap_or_default();

        let base_model_dir = self
            .registry
            .static_root()
            .join(&record.base_model)
            .join(UploadConfig::BASE_SAVED_MODEL_DIR);
        if !tokio::fs::try_exists(&base_model_dir).await.unwrap_or(false) {
            return Err(TrainpipeError::BaseModelNotFound {
                name: record.base_model.clone(),
            });
        }

        tokio::fs::create_dir_all(&self.paths.work_root)
            .await
            .with_path(&self.paths.work_root)?;
        let staging = tempfile::Builder::new()
            .prefix("upload-")
            .tempdir_in(&self.paths.work_root)
            .with_path(&self.paths.work_root)?;
        let model_json_path = staging.path().join(UploadConfig::MODEL_JSON_PART);
        let weights_path = staging.path().join(UploadConfig::WEIGHTS_PART);
        tokio::fs::write(&model_json_path, model_json)
            .await
            .with_path(&model_json_path)?;
        tokio::fs::write(&weights_path, weights)
            .await
            .with_path(&weights_path)?;
        debug!("Staged upload for model {} in {}", id, staging.path().display());

        let sources = UploadSources {
            model_json: &model_json_path,
            weights: &weights_path,
            base_model_dir: &base_model_dir,
            input_shape: &input_shape,
        };
        let filename = async {
            let blob = self
                .uploads
                .convert(&sources, staging.path(), &CancellationToken::new())
                .await?;
            self.exporter.publish_blob(&blob, &record.name).await
        }
        .await
        .map_err(TrainpipeError::into_export_error)?;

        let store = Arc::clone(&self.store);
        let published = filename.clone();
        let updated = run_blocking(move || store.set_model_path(id, &published))
            .await?
            .ok_or_else(|| not_found(id))?;

        if record.has_artifact() && record.model_path != filename {
            let stale = self.artifact_path(&record.model_path);
            if let Err(e) = tokio::fs::remove_file(&stale).await {
                warn!("Could not remove previous artifact {}: {}", stale.display(), e);
            }
        }
        info!("Uploaded model {} published as {}", updated.name, filename);
        Ok(updated)
    }

    /// Rename or retag a model. The artifact file keeps its name.
    pub async fn update_model(
        &self,
        id: i64,
        patch: ModelRecordPatch,
    ) -> Result<TrainedModelRecord> {
        if let Some(name) = &patch.name {
            validate_model_name(name)?;
        }
        if let Some(base_model) = &patch.base_model {
            if base_model.trim().is_empty() {
                return Err(TrainpipeError::validation(
                    "base_model",
                    "base model must not be empty",
                ));
            }
        }
        let store = Arc::clone(&self.store);
        run_blocking(move || store.update(id, &patch))
            .await?
            .ok_or_else(|| not_found(id))
    }

    /// Delete a model record and its artifact.
    pub async fn delete_model(&self, id: i64) -> Result<TrainedModelRecord> {
        let store = Arc::clone(&self.store);
        let record = run_blocking(move || store.delete(id))
            .await?
            .ok_or_else(|| not_found(id))?;

        if !record.has_artifact() {
            info!("Deleted model {} (no artifact)", record.name);
            return Ok(record);
        }
        let artifact = self.artifact_path(&record.model_path);
        match tokio::fs::remove_file(&artifact).await {
            Ok(()) => info!("Deleted model {} and {}", record.name, artifact.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Artifact for model {} was already gone", record.name)
            }
            Err(e) => return Err(TrainpipeError::io("removing artifact", artifact, e)),
        }
        Ok(record)
    }

    /// Absolute path of an artifact file name.
    pub fn artifact_path(&self, model_path: &str) -> PathBuf {
        self.paths.artifact_root.join(model_path)
    }
}

fn not_found(id: i64) -> TrainpipeError {
    TrainpipeError::NotFound {
        entity: "model",
        id: id.to_string(),
    }
}
