//! Uploaded TF.js classifier heads stacked on a base model.

use crate::cancel::CancellationToken;
use crate::config::{TrainingConfig, UploadConfig};
use crate::scripts::{ScriptEnvironment, CONVERT_UPLOAD_SCRIPT_NAME};
use crate::{Result, TrainpipeError};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The two parts of a TF.js layers model, as uploaded.
#[derive(Debug, Clone, Default)]
pub struct ModelUpload {
    pub model_json: Option<Vec<u8>>,
    pub weights: Option<Vec<u8>>,
}

impl ModelUpload {
    /// Both parts, or a validation error naming what is missing.
    pub fn into_parts(self) -> Result<(Vec<u8>, Vec<u8>)> {
        match (self.model_json, self.weights) {
            (None, None) => Err(TrainpipeError::validation("files", "No files uploaded")),
            (Some(model_json), Some(weights)) => Ok((model_json, weights)),
            _ => Err(TrainpipeError::validation(
                "files",
                format!(
                    "{} or {} not uploaded",
                    UploadConfig::MODEL_JSON_PART,
                    UploadConfig::WEIGHTS_PART
                ),
            )),
        }
    }
}

/// Input of one conversion; all paths are local files or directories.
#[derive(Debug, Clone)]
pub struct UploadSources<'a> {
    pub model_json: &'a Path,
    pub weights: &'a Path,
    /// SavedModel directory of the base model.
    pub base_model_dir: &'a Path,
    /// Keras build shape from the base model manifest, e.g. `[null, 224, 224, 3]`.
    pub input_shape: &'a serde_json::Value,
}

/// Turns an uploaded head plus its base model into a device blob.
#[async_trait]
pub trait UploadConverter: Send + Sync {
    /// Write the blob somewhere under `out_dir` and return its path.
    async fn convert(
        &self,
        sources: &UploadSources<'_>,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;
}

/// Conversion through the bundled `convert_upload.py`.
#[derive(Debug, Clone)]
pub struct ScriptUploadConverter {
    env: ScriptEnvironment,
}

impl ScriptUploadConverter {
    pub fn new(env: ScriptEnvironment) -> Self {
        Self { env }
    }
}

#[async_trait]
impl UploadConverter for ScriptUploadConverter {
    async fn convert(
        &self,
        sources: &UploadSources<'_>,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let args: Vec<OsString> = vec![
            "--model-json".into(),
            sources.model_json.into(),
            "--weights".into(),
            sources.weights.into(),
            "--base-model-dir".into(),
            sources.base_model_dir.into(),
            "--input-shape".into(),
            sources.input_shape.to_string().into(),
            "--output-dir".into(),
            out_dir.into(),
            "--data-type".into(),
            TrainingConfig::BLOB_DATA_TYPE.into(),
            "--shaves".into(),
            TrainingConfig::BLOB_SHAVES.to_string().into(),
        ];
        let outcome = self
            .env
            .run(CONVERT_UPLOAD_SCRIPT_NAME, &args, cancel, |event| {
                debug!("convert_upload: {:?}", event)
            })
            .await?;
        outcome.output.ok_or_else(|| TrainpipeError::Export {
            message: "upload conversion reported no output file".into(),
        })
    }
}

/// The base model's Keras build shape: an array whose spatial dims are set.
pub fn validate_input_shape(base_model: &str, shape: Option<&serde_json::Value>) -> Result<()> {
    let spatial_ok = shape
        .and_then(|s| s.as_array())
        .filter(|dims| dims.len() == 4)
        .is_some_and(|dims| dims[1].as_u64().is_some() && dims[2].as_u64().is_some());
    if spatial_ok {
        Ok(())
    } else {
        Err(TrainpipeError::Config {
            message: format!(
                "base model {base_model} declares no usable {} in its manifest",
                UploadConfig::INPUT_SHAPE_KEY
            ),
        })
    }
}
