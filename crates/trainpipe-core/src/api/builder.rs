//! Builder for TrainpipeApi.

use crate::config::StoragePaths;
use crate::dataset::{AnnotationConverter, NativeYoloConverter};
use crate::error::{Result, TrainpipeError};
use crate::export::{
    BlobCompiler, CheckpointExporter, GraphExporter, ScriptBlobCompiler, ScriptCheckpointExporter,
    ScriptUploadConverter, UploadConverter,
};
use crate::network::Downloader;
use crate::platform::Device;
use crate::project::{FsProjectSource, ProjectSource};
use crate::registry::BaseModelRegistry;
use crate::scripts::ScriptEnvironment;
use crate::store::{ModelStore, SqliteModelStore};
use crate::training::{TrainingBackend, TrainingOrchestrator, YoloScriptBackend};
use crate::TrainpipeApi;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Builder for configuring a [`TrainpipeApi`].
///
/// Every collaborator defaults to the bundled implementation: projects on
/// disk, the SQLite store under the data root, and the Python helper scripts.
///
/// # Example
///
/// ```rust,ignore
/// let api = TrainpipeApi::builder("/srv/trainpipe")
///     .auto_create_dirs(true)
///     .with_device(Device::Cpu)
///     .build()
///     .await?;
/// ```
pub struct TrainpipeApiBuilder {
    data_root: PathBuf,
    auto_create_dirs: bool,
    interpreter: Option<PathBuf>,
    device: Option<Device>,
    projects: Option<Arc<dyn ProjectSource>>,
    converter: Option<Arc<dyn AnnotationConverter>>,
    backend: Option<Arc<dyn TrainingBackend>>,
    onnx: Option<Arc<dyn CheckpointExporter>>,
    compiler: Option<Arc<dyn BlobCompiler>>,
    uploads: Option<Arc<dyn UploadConverter>>,
    store: Option<Arc<dyn ModelStore>>,
}

impl TrainpipeApiBuilder {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            auto_create_dirs: false,
            interpreter: None,
            device: None,
            projects: None,
            converter: None,
            backend: None,
            onnx: None,
            compiler: None,
            uploads: None,
            store: None,
        }
    }

    /// Auto-create the data root and its subdirectories.
    ///
    /// Default: `false` (the data root must exist)
    pub fn auto_create_dirs(mut self, enable: bool) -> Self {
        self.auto_create_dirs = enable;
        self
    }

    /// Run helper scripts with this interpreter instead of the managed venv.
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Pin the training device. Detected per job when unset.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_project_source(mut self, projects: Arc<dyn ProjectSource>) -> Self {
        self.projects = Some(projects);
        self
    }

    pub fn with_converter(mut self, converter: Arc<dyn AnnotationConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn with_training_backend(mut self, backend: Arc<dyn TrainingBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_checkpoint_exporter(mut self, onnx: Arc<dyn CheckpointExporter>) -> Self {
        self.onnx = Some(onnx);
        self
    }

    pub fn with_blob_compiler(mut self, compiler: Arc<dyn BlobCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn with_upload_converter(mut self, uploads: Arc<dyn UploadConverter>) -> Self {
        self.uploads = Some(uploads);
        self
    }

    pub fn with_model_store(mut self, store: Arc<dyn ModelStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn create_directory_structure(paths: &StoragePaths) -> Result<()> {
        for dir in paths.required_dirs() {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| TrainpipeError::Io {
                    message: format!("Failed to create directory: {}", dir.display()),
                    path: Some(dir.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }
        Ok(())
    }

    /// Build the TrainpipeApi instance.
    pub async fn build(self) -> Result<TrainpipeApi> {
        let paths = StoragePaths::from_root(&self.data_root);

        if self.auto_create_dirs {
            Self::create_directory_structure(&paths)?;
        } else if !paths.data_root.exists() {
            return Err(TrainpipeError::Config {
                message: format!("Data root does not exist: {}", paths.data_root.display()),
            });
        }

        let mut scripts = ScriptEnvironment::from_paths(&paths);
        if let Some(interpreter) = self.interpreter {
            scripts = scripts.with_interpreter(interpreter);
        }

        let downloader = Downloader::new().map_err(|e| TrainpipeError::Config {
            message: format!("Failed to initialize HTTP client: {}", e),
        })?;
        let registry = Arc::new(BaseModelRegistry::from_paths(&paths, downloader));

        let store: Arc<dyn ModelStore> = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteModelStore::open(&paths.database_path)?),
        };

        let projects = self
            .projects
            .unwrap_or_else(|| Arc::new(FsProjectSource::from_paths(&paths)));
        let converter = self
            .converter
            .unwrap_or_else(|| Arc::new(NativeYoloConverter::new()));
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(YoloScriptBackend::new(scripts.clone())));
        let onnx = self
            .onnx
            .unwrap_or_else(|| Arc::new(ScriptCheckpointExporter::new(scripts.clone())));
        let compiler = self
            .compiler
            .unwrap_or_else(|| Arc::new(ScriptBlobCompiler::new(scripts.clone())));
        let uploads = self
            .uploads
            .unwrap_or_else(|| Arc::new(ScriptUploadConverter::new(scripts.clone())));

        let exporter = GraphExporter::new(onnx, compiler, paths.artifact_root.clone());
        let mut orchestrator = TrainingOrchestrator::new(
            projects,
            registry.clone(),
            converter,
            backend,
            exporter.clone(),
            store.clone(),
            paths.work_root.clone(),
        );
        if let Some(device) = self.device {
            orchestrator = orchestrator.with_device(device);
        }

        debug!("Storage layout: {:?}", paths);
        info!("Trainpipe initialized at {}", paths.data_root.display());

        Ok(TrainpipeApi {
            paths,
            registry,
            store,
            orchestrator,
            exporter,
            uploads,
            scripts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_root_without_auto_create() {
        let dir = TempDir::new().unwrap();
        let result = TrainpipeApiBuilder::new(dir.path().join("absent")).build().await;
        assert!(matches!(result, Err(TrainpipeError::Config { .. })));
    }

    #[tokio::test]
    async fn test_auto_create_dirs() {
        let dir = TempDir::new().unwrap();
        let api = TrainpipeApiBuilder::new(dir.path().join("root"))
            .auto_create_dirs(true)
            .build()
            .await
            .unwrap();

        for required in api.paths().required_dirs() {
            assert!(required.is_dir(), "{}", required.display());
        }
        assert!(api.paths().database_path.exists());
    }
}
