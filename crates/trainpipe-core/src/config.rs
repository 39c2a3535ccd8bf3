//! Centralized configuration for trainpipe.
//!
//! Constant groups for the training pipeline, dataset layout and network
//! operations, plus the on-disk layout rooted at a single data directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "trainpipe";
    pub const DATA_DIR_NAME: &'static str = "trainpipe";
}

/// Training and export defaults.
pub struct TrainingConfig;

impl TrainingConfig {
    /// Resolution the checkpoint is exported at before any input surgery.
    pub const CANONICAL_RESOLUTION: (u32, u32) = (640, 640);
    /// Network stride; requested resolutions must be multiples of it.
    pub const RESOLUTION_STRIDE: u32 = 32;
    pub const DEFAULT_EPOCHS: u32 = 10;
    pub const MAX_EPOCHS: u32 = 1000;
    pub const DEFAULT_BASE_MODEL: &'static str = "yolov8n";
    /// Checkpoint filename inside an installed base model directory.
    pub const BASE_CHECKPOINT_FILENAME: &'static str = "model.pt";
    /// Checkpoint the training framework writes for the best epoch.
    pub const BEST_CHECKPOINT_FILENAME: &'static str = "best.pt";
    pub const ARTIFACT_EXTENSION: &'static str = "blob";
    pub const BLOB_DATA_TYPE: &'static str = "FP16";
    pub const BLOB_SHAVES: u32 = 6;
}

/// Uploaded classifier heads composed onto a base model.
pub struct UploadConfig;

impl UploadConfig {
    pub const MODEL_JSON_PART: &'static str = "model.json";
    pub const WEIGHTS_PART: &'static str = "model.weights.bin";
    /// SavedModel directory of the base model, under its static directory.
    pub const BASE_SAVED_MODEL_DIR: &'static str = "tf";
    /// Manifest key holding the Keras build shape of the base model.
    pub const INPUT_SHAPE_KEY: &'static str = "input_shape";
    pub const MAX_BYTES: usize = 256 * 1024 * 1024;
}

/// Dataset layout and split configuration.
pub struct DatasetConfig;

impl DatasetConfig {
    pub const DEFAULT_VAL_SPLIT: f64 = 0.1;
    pub const FORMAT: &'static str = "YOLO";
    pub const TASKS_EXPORT_FILENAME: &'static str = "tasks.json";
    pub const CLASSES_FILENAME: &'static str = "classes.txt";
    pub const MANIFEST_FILENAME: &'static str = "data.yaml";
    pub const IMAGES_DIR: &'static str = "images";
    pub const LABELS_DIR: &'static str = "labels";
    pub const TRAIN_DIR: &'static str = "train";
    pub const VAL_DIR: &'static str = "val";
    pub const LABEL_EXTENSION: &'static str = "txt";

    // Per-pair move retry during the split
    pub const MOVE_RETRY_ATTEMPTS: u32 = 3;
    pub const MOVE_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);
    pub const MOVE_RETRY_MAX_DELAY: Duration = Duration::from_secs(1);
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const DOWNLOAD_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);
    pub const MAX_RETRIES: u32 = 3;
    pub const DOWNLOAD_RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
    pub const USER_AGENT: &'static str = "trainpipe/0.3";
}

/// Directory and file names under the data root.
pub struct PathsConfig;

impl PathsConfig {
    pub const MODELS_DIR_NAME: &'static str = "models";
    pub const STATIC_DIR_NAME: &'static str = "static";
    pub const ARTIFACTS_DIR_NAME: &'static str = "artifacts";
    pub const PROJECTS_DIR_NAME: &'static str = "projects";
    pub const MEDIA_DIR_NAME: &'static str = "media";
    pub const UPLOAD_DIR_NAME: &'static str = "upload";
    pub const SCRIPTS_DIR_NAME: &'static str = "scripts";
    pub const VENV_DIR_NAME: &'static str = "venv";
    pub const WORK_DIR_NAME: &'static str = "jobs";
    pub const DATABASE_FILENAME: &'static str = "trainpipe.sqlite3";
    pub const MANIFEST_FILENAME: &'static str = "config.json";
}

/// Resolved on-disk layout of a trainpipe installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub data_root: PathBuf,
    /// Base model manifests and fetched checkpoints, one directory per model.
    pub models_root: PathBuf,
    /// Statically served base-model assets.
    pub static_root: PathBuf,
    /// Exported `.blob` artifacts.
    pub artifact_root: PathBuf,
    pub projects_root: PathBuf,
    /// Project uploads, one directory per project id.
    pub upload_root: PathBuf,
    pub scripts_dir: PathBuf,
    pub venv_dir: PathBuf,
    /// Per-job temporary directories.
    pub work_root: PathBuf,
    pub database_path: PathBuf,
}

impl StoragePaths {
    pub fn from_root(data_root: impl AsRef<Path>) -> Self {
        let root = data_root.as_ref().to_path_buf();
        Self {
            models_root: root.join(PathsConfig::MODELS_DIR_NAME),
            static_root: root
                .join(PathsConfig::STATIC_DIR_NAME)
                .join(PathsConfig::MODELS_DIR_NAME),
            artifact_root: root.join(PathsConfig::ARTIFACTS_DIR_NAME),
            projects_root: root.join(PathsConfig::PROJECTS_DIR_NAME),
            upload_root: root
                .join(PathsConfig::MEDIA_DIR_NAME)
                .join(PathsConfig::UPLOAD_DIR_NAME),
            scripts_dir: root.join(PathsConfig::SCRIPTS_DIR_NAME),
            venv_dir: root.join(PathsConfig::VENV_DIR_NAME),
            work_root: root.join(PathsConfig::WORK_DIR_NAME),
            database_path: root.join(PathsConfig::DATABASE_FILENAME),
            data_root: root,
        }
    }

    /// Default data root: the platform data dir, falling back to `./trainpipe-data`.
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join(AppConfig::DATA_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("trainpipe-data"))
    }

    /// Directories that must exist before the API can serve requests.
    pub fn required_dirs(&self) -> [&Path; 7] {
        [
            &self.models_root,
            &self.static_root,
            &self.artifact_root,
            &self.projects_root,
            &self.upload_root,
            &self.scripts_dir,
            &self.work_root,
        ]
    }
}
