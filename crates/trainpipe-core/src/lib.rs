//! Trainpipe Core - headless library for training and exporting YOLO detectors.
//!
//! Turns a project's annotated images into a train/val dataset, fine-tunes a
//! base model in the background while streaming per-epoch progress, exports
//! the best checkpoint to ONNX (optionally resizing its input) and compiles it
//! to a `.blob` artifact recorded in a SQLite model store.
//!
//! # Example
//!
//! ```rust,ignore
//! use trainpipe_core::{TrainRequest, TrainpipeApi};
//!
//! #[tokio::main]
//! async fn main() -> trainpipe_core::Result<()> {
//!     let api = TrainpipeApi::builder("/srv/trainpipe")
//!         .auto_create_dirs(true)
//!         .build()
//!         .await?;
//!
//!     let request = TrainRequest::new("widgets").with_epochs(20);
//!     let mut progress = api.train(1, request).await?;
//!     while let Some(message) = progress.next().await {
//!         println!("{}", serde_json::to_string(&message)?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod dataset;
pub mod error;
pub mod export;
pub mod network;
pub mod platform;
pub mod project;
pub mod registry;
pub mod resolution;
pub mod retry;
pub mod scripts;
pub mod store;
pub mod training;

mod api;

// Re-export commonly used types
pub use cancel::{CancellationToken, CancelledError};
pub use config::StoragePaths;
pub use dataset::{AnnotationConverter, DatasetBuilder, NativeYoloConverter, PreparedDataset};
pub use error::{Result, TrainpipeError};
pub use export::{
    add_input_resize, BlobCompiler, CheckpointExporter, GraphExporter, ModelUpload,
    UploadConverter, UploadSources,
};
pub use platform::Device;
pub use project::{FsProjectSource, ProjectSnapshot, ProjectSource};
pub use registry::{BaseModelEntry, BaseModelRegistry, InstallReport, InstallSelection, ModelTask};
pub use resolution::Resolution;
pub use scripts::ScriptEnvironment;
pub use store::{
    CreateModelRequest, ModelRecordPatch, ModelStore, ModelType, NewModelRecord,
    SqliteModelStore, TrainedModelRecord,
};
pub use training::{
    EpochReport, JobStage, ProgressMessage, ProgressStream, StatusType, TrainRequest,
    TrainingBackend, TrainingOrchestrator,
};

pub use api::TrainpipeApiBuilder;

use std::sync::Arc;

/// Main entry point for trainpipe operations.
///
/// Owns the base-model registry, the model store and the training
/// orchestrator for one data root. Cheap to share behind an `Arc`.
pub struct TrainpipeApi {
    paths: StoragePaths,
    registry: Arc<BaseModelRegistry>,
    store: Arc<dyn ModelStore>,
    orchestrator: TrainingOrchestrator,
    exporter: GraphExporter,
    uploads: Arc<dyn UploadConverter>,
    scripts: ScriptEnvironment,
}

impl TrainpipeApi {
    /// Create a builder rooted at `data_root`.
    pub fn builder(data_root: impl Into<std::path::PathBuf>) -> TrainpipeApiBuilder {
        TrainpipeApiBuilder::new(data_root)
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn registry(&self) -> &BaseModelRegistry {
        &self.registry
    }
}
