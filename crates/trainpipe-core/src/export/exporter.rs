//! Checkpoint → ONNX → `.blob` pipeline.

use super::onnx::{load_model, save_model};
use super::surgery::add_input_resize;
use crate::cancel::CancellationToken;
use crate::config::TrainingConfig;
use crate::error::IoResultExt;
use crate::resolution::Resolution;
use crate::scripts::{ScriptEnvironment, COMPILE_BLOB_SCRIPT_NAME, EXPORT_ONNX_SCRIPT_NAME};
use crate::{Result, TrainpipeError};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Converts a trained checkpoint into an ONNX graph.
#[async_trait]
pub trait CheckpointExporter: Send + Sync {
    /// Write `<out_dir>/...onnx` exported at `resolution` and return its path.
    async fn export_onnx(
        &self,
        checkpoint: &Path,
        resolution: Resolution,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;
}

/// Compiles an ONNX graph into a device blob.
#[async_trait]
pub trait BlobCompiler: Send + Sync {
    async fn compile(
        &self,
        onnx: &Path,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;
}

/// ONNX export through the bundled `export_onnx.py`.
#[derive(Debug, Clone)]
pub struct ScriptCheckpointExporter {
    env: ScriptEnvironment,
}

impl ScriptCheckpointExporter {
    pub fn new(env: ScriptEnvironment) -> Self {
        Self { env }
    }
}

#[async_trait]
impl CheckpointExporter for ScriptCheckpointExporter {
    async fn export_onnx(
        &self,
        checkpoint: &Path,
        resolution: Resolution,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let args: Vec<OsString> = vec![
            "--checkpoint".into(),
            checkpoint.into(),
            "--output-dir".into(),
            out_dir.into(),
            "--height".into(),
            resolution.height.to_string().into(),
            "--width".into(),
            resolution.width.to_string().into(),
        ];
        let outcome = self
            .env
            .run(EXPORT_ONNX_SCRIPT_NAME, &args, cancel, |_| {})
            .await?;
        outcome.output.ok_or_else(|| TrainpipeError::Export {
            message: "ONNX export reported no output file".into(),
        })
    }
}

/// Blob compilation through the bundled `compile_blob.py`.
#[derive(Debug, Clone)]
pub struct ScriptBlobCompiler {
    env: ScriptEnvironment,
    data_type: String,
    shaves: u32,
}

impl ScriptBlobCompiler {
    pub fn new(env: ScriptEnvironment) -> Self {
        Self {
            env,
            data_type: TrainingConfig::BLOB_DATA_TYPE.to_string(),
            shaves: TrainingConfig::BLOB_SHAVES,
        }
    }

    pub fn with_shaves(mut self, shaves: u32) -> Self {
        self.shaves = shaves;
        self
    }
}

#[async_trait]
impl BlobCompiler for ScriptBlobCompiler {
    async fn compile(
        &self,
        onnx: &Path,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let args: Vec<OsString> = vec![
            "--onnx".into(),
            onnx.into(),
            "--output-dir".into(),
            out_dir.into(),
            "--data-type".into(),
            self.data_type.clone().into(),
            "--shaves".into(),
            self.shaves.to_string().into(),
        ];
        let outcome = self
            .env
            .run(COMPILE_BLOB_SCRIPT_NAME, &args, cancel, |_| {})
            .await?;
        outcome.output.ok_or_else(|| TrainpipeError::Export {
            message: "blob compiler reported no output file".into(),
        })
    }
}

/// Produces `<artifact_root>/<model_name>.blob` from a trained checkpoint.
#[derive(Clone)]
pub struct GraphExporter {
    onnx: Arc<dyn CheckpointExporter>,
    compiler: Arc<dyn BlobCompiler>,
    artifact_root: PathBuf,
}

impl GraphExporter {
    pub fn new(
        onnx: Arc<dyn CheckpointExporter>,
        compiler: Arc<dyn BlobCompiler>,
        artifact_root: PathBuf,
    ) -> Self {
        Self {
            onnx,
            compiler,
            artifact_root,
        }
    }

    pub fn artifact_root(&self) -> &Path {
        &self.artifact_root
    }

    /// File name of the artifact for `model_name`.
    pub fn artifact_filename(model_name: &str) -> String {
        format!("{}.{}", model_name, TrainingConfig::ARTIFACT_EXTENSION)
    }

    /// Export `checkpoint` and return the artifact's file name relative to the
    /// artifact root. All intermediate files live in `work_dir`.
    ///
    /// Nothing appears at the artifact path unless every step succeeded.
    pub async fn export(
        &self,
        checkpoint: &Path,
        model_name: &str,
        resolution: Resolution,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.export_inner(checkpoint, model_name, resolution, work_dir, cancel)
            .await
            .map_err(TrainpipeError::into_export_error)
    }

    async fn export_inner(
        &self,
        checkpoint: &Path,
        model_name: &str,
        resolution: Resolution,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if !tokio::fs::try_exists(checkpoint).await.unwrap_or(false) {
            return Err(TrainpipeError::Export {
                message: format!("checkpoint not found: {}", checkpoint.display()),
            });
        }

        let staging = tempfile::Builder::new()
            .prefix("export-")
            .tempdir_in(work_dir)
            .with_path(work_dir)?;

        let onnx_path = self
            .onnx
            .export_onnx(checkpoint, Resolution::canonical(), staging.path(), cancel)
            .await?;
        cancel.check()?;

        if !resolution.is_canonical() {
            debug!("Resizing graph input to {}", resolution);
            let model = load_model(&onnx_path).await?;
            let resized = add_input_resize(&model, resolution)?;
            save_model(&resized, &onnx_path).await?;
        }

        let blob = self
            .compiler
            .compile(&onnx_path, staging.path(), cancel)
            .await?;
        cancel.check()?;

        let filename = self.publish_blob(&blob, model_name).await?;
        info!("Exported {} (input {})", filename, resolution);
        Ok(filename)
    }

    /// Publish a compiled blob as the artifact of `model_name` and return the
    /// artifact file name. An empty or missing blob is an export error.
    pub async fn publish_blob(&self, blob: &Path, model_name: &str) -> Result<String> {
        let size = tokio::fs::metadata(blob)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if size == 0 {
            return Err(TrainpipeError::Export {
                message: format!("blob compiler produced no output at {}", blob.display()),
            });
        }

        let filename = Self::artifact_filename(model_name);
        self.publish(blob, &filename).await?;
        debug!("Published {} ({} bytes)", filename, size);
        Ok(filename)
    }

    /// Move `blob` (inside the job's staging dir) to `<artifact_root>/<filename>`.
    ///
    /// When the staging dir is on another filesystem the blob is copied into
    /// a hidden `.<name>.part` beside the target first, then renamed.
    async fn publish(&self, blob: &Path, filename: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.artifact_root)
            .await
            .with_path(&self.artifact_root)?;

        let target = self.artifact_root.join(filename);
        match tokio::fs::rename(blob, &target).await {
            Ok(()) => return Ok(()),
            Err(e) => debug!("Rename into artifact root failed ({}), copying instead", e),
        }

        let staged = self.artifact_root.join(format!(".{filename}.part"));

        if let Err(e) = tokio::fs::copy(blob, &staged).await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(TrainpipeError::io("staging artifact", &staged, e));
        }
        if let Err(e) = tokio::fs::rename(&staged, &target).await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(TrainpipeError::io("publishing artifact", &target, e));
        }
        Ok(())
    }
}
