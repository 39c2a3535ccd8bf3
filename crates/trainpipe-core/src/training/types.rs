//! Request and progress-message types for training jobs.

use crate::config::{DatasetConfig, TrainingConfig};
use crate::dataset::validate_val_split;
use crate::resolution::Resolution;
use crate::store::TrainedModelRecord;
use crate::{Result, TrainpipeError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;

static MODEL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("model name regex must compile")
});

/// Longest accepted model name.
pub const MAX_MODEL_NAME_LEN: usize = 128;

/// Status tag carried by non-epoch progress messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusType {
    Loading,
    Ready,
    Error,
}

/// Metrics of one completed epoch. Epochs are numbered from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: u32,
    #[serde(default)]
    pub metrics: Map<String, Value>,
}

/// One event of the training progress stream.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_type: Option<StatusType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EpochReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TrainedModelRecord>,
}

impl ProgressMessage {
    pub fn status(log: impl Into<String>, status_type: StatusType) -> Self {
        Self {
            log: Some(log.into()),
            status_type: Some(status_type),
            ..Default::default()
        }
    }

    pub fn loading(log: impl Into<String>) -> Self {
        Self::status(log, StatusType::Loading)
    }

    pub fn ready(log: impl Into<String>) -> Self {
        Self::status(log, StatusType::Ready)
    }

    pub fn error(log: impl Into<String>) -> Self {
        Self::status(log, StatusType::Error)
    }

    /// `{data: {epoch, metrics}, log: "epoch k: {...}"}`.
    pub fn epoch(report: EpochReport) -> Self {
        let metrics = Value::Object(report.metrics.clone());
        Self {
            log: Some(format!("epoch {}: {}", report.epoch, metrics)),
            data: Some(report),
            ..Default::default()
        }
    }

    pub fn result(record: TrainedModelRecord) -> Self {
        Self {
            result: Some(record),
            ..Default::default()
        }
    }

    pub fn epoch_index(&self) -> Option<u32> {
        self.data.as_ref().map(|d| d.epoch)
    }

    pub fn is_error(&self) -> bool {
        self.status_type == Some(StatusType::Error)
    }

    /// A result or an error ends the stream.
    pub fn is_terminal(&self) -> bool {
        self.result.is_some() || self.is_error()
    }
}

/// Lifecycle of a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStage {
    Init,
    DatasetReady,
    ModelLoaded,
    Training,
    Exporting,
    Done,
    Error,
    Cancelled,
}

impl JobStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Done | JobStage::Error | JobStage::Cancelled)
    }
}

fn default_base_model() -> String {
    TrainingConfig::DEFAULT_BASE_MODEL.to_string()
}

fn default_epochs() -> u32 {
    TrainingConfig::DEFAULT_EPOCHS
}

fn default_val_split() -> f64 {
    DatasetConfig::DEFAULT_VAL_SPLIT
}

/// Body of a train request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrainRequest {
    /// Name of the resulting model; also names the artifact.
    pub name: String,
    #[serde(default = "default_base_model")]
    pub base_model: String,
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    /// Input resolution of the exported graph.
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default = "default_val_split")]
    pub val_split: f64,
}

impl TrainRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_model: default_base_model(),
            epochs: default_epochs(),
            resolution: Resolution::default(),
            val_split: default_val_split(),
        }
    }

    pub fn with_base_model(mut self, base_model: impl Into<String>) -> Self {
        self.base_model = base_model.into();
        self
    }

    pub fn with_epochs(mut self, epochs: u32) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_val_split(mut self, val_split: f64) -> Self {
        self.val_split = val_split;
        self
    }

    /// Checks that need no I/O. Name uniqueness and project existence are
    /// checked by the orchestrator.
    pub fn validate(&self) -> Result<()> {
        validate_model_name(&self.name)?;
        if !MODEL_NAME.is_match(&self.base_model) {
            return Err(TrainpipeError::validation(
                "base_model",
                format!("invalid base model name: {:?}", self.base_model),
            ));
        }
        if self.epochs == 0 || self.epochs > TrainingConfig::MAX_EPOCHS {
            return Err(TrainpipeError::validation(
                "epochs",
                format!("epochs must be between 1 and {}", TrainingConfig::MAX_EPOCHS),
            ));
        }
        validate_val_split(self.val_split)
    }
}

/// Model names double as artifact file names.
pub fn validate_model_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TrainpipeError::validation("name", "name must not be empty"));
    }
    if name.len() > MAX_MODEL_NAME_LEN {
        return Err(TrainpipeError::validation(
            "name",
            format!("name must be at most {MAX_MODEL_NAME_LEN} characters"),
        ));
    }
    if !MODEL_NAME.is_match(name) {
        return Err(TrainpipeError::validation(
            "name",
            "name may contain only letters, digits, '.', '_' and '-' and must start with a letter or digit",
        ));
    }
    Ok(())
}
