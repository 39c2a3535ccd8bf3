//! Training loop adapters.

use super::types::EpochReport;
use crate::cancel::CancellationToken;
use crate::config::TrainingConfig;
use crate::platform::Device;
use crate::scripts::{ScriptEnvironment, ScriptEvent, TRAIN_SCRIPT_NAME};
use crate::{Result, TrainpipeError};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Inputs of one training run.
#[derive(Debug, Clone)]
pub struct TrainingRun {
    /// Base model checkpoint to fine-tune.
    pub checkpoint: PathBuf,
    /// Dataset manifest (`data.yaml`).
    pub data_manifest: PathBuf,
    pub epochs: u32,
    pub device: Device,
    /// Directory receiving run outputs (weights, plots).
    pub project_dir: PathBuf,
}

/// Callback invoked once per completed epoch.
pub type EpochCallback<'a> = &'a mut (dyn FnMut(EpochReport) + Send);

/// Runs a training loop and reports epochs as they complete.
#[async_trait]
pub trait TrainingBackend: Send + Sync {
    /// Train and return the path of the best checkpoint.
    ///
    /// Must stop promptly once `cancel` fires.
    async fn train(
        &self,
        run: &TrainingRun,
        on_epoch: EpochCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;
}

/// Trains through the bundled `train_yolo.py`.
#[derive(Debug, Clone)]
pub struct YoloScriptBackend {
    env: ScriptEnvironment,
}

impl YoloScriptBackend {
    pub fn new(env: ScriptEnvironment) -> Self {
        Self { env }
    }
}

#[async_trait]
impl TrainingBackend for YoloScriptBackend {
    async fn train(
        &self,
        run: &TrainingRun,
        on_epoch: EpochCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let args: Vec<OsString> = vec![
            "--checkpoint".into(),
            run.checkpoint.clone().into(),
            "--data".into(),
            run.data_manifest.clone().into(),
            "--epochs".into(),
            run.epochs.to_string().into(),
            "--device".into(),
            run.device.as_str().into(),
            "--project".into(),
            run.project_dir.clone().into(),
        ];

        info!(
            "Training {} for {} epochs on {}",
            run.checkpoint.display(),
            run.epochs,
            run.device
        );
        let outcome = self
            .env
            .run(TRAIN_SCRIPT_NAME, &args, cancel, |event| match event {
                ScriptEvent::Epoch { epoch, metrics } => on_epoch(EpochReport {
                    epoch: *epoch,
                    metrics: metrics.clone(),
                }),
                ScriptEvent::Log { message } => debug!("{}", message),
                _ => {}
            })
            .await?;

        match outcome.output {
            Some(path) if path.is_file() => Ok(path),
            _ => find_best_checkpoint(&run.project_dir).ok_or_else(|| TrainpipeError::Training {
                message: format!(
                    "training finished without a {} under {}",
                    TrainingConfig::BEST_CHECKPOINT_FILENAME,
                    run.project_dir.display()
                ),
            }),
        }
    }
}

/// Locate `weights/best.pt` anywhere below a run directory.
pub fn find_best_checkpoint(project_dir: &Path) -> Option<PathBuf> {
    WalkDir::new(project_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| {
            e.file_type().is_file()
                && e.file_name() == TrainingConfig::BEST_CHECKPOINT_FILENAME
                && e.path()
                    .parent()
                    .and_then(|p| p.file_name())
                    .is_some_and(|n| n == "weights")
        })
        .map(|e| e.into_path())
}
