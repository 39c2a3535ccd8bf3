//! Training jobs: dataset → base model → training → export → record.
//!
//! [`TrainingOrchestrator::start`] validates a request synchronously, then
//! spawns one background task for the job. The task is the only producer of
//! the job's progress queue; the returned [`ProgressStream`] is the only
//! consumer.

use super::backend::{TrainingBackend, TrainingRun};
use super::types::{EpochReport, JobStage, ProgressMessage, TrainRequest};
use crate::cancel::CancellationToken;
use crate::dataset::{AnnotationConverter, DatasetBuilder};
use crate::error::IoResultExt;
use crate::export::GraphExporter;
use crate::platform::{run_blocking, Device};
use crate::project::ProjectSource;
use crate::registry::BaseModelRegistry;
use crate::store::{ModelStore, ModelType, NewModelRecord, TrainedModelRecord};
use crate::{Result, TrainpipeError};
use futures::Stream;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type JobQueue = mpsc::UnboundedSender<(JobStage, ProgressMessage)>;

/// Starts training jobs. Cheap to clone.
#[derive(Clone)]
pub struct TrainingOrchestrator {
    projects: Arc<dyn ProjectSource>,
    registry: Arc<BaseModelRegistry>,
    converter: Arc<dyn AnnotationConverter>,
    backend: Arc<dyn TrainingBackend>,
    exporter: GraphExporter,
    store: Arc<dyn ModelStore>,
    work_root: PathBuf,
    device: Option<Device>,
    reserved: Arc<Mutex<HashSet<String>>>,
}

impl TrainingOrchestrator {
    pub fn new(
        projects: Arc<dyn ProjectSource>,
        registry: Arc<BaseModelRegistry>,
        converter: Arc<dyn AnnotationConverter>,
        backend: Arc<dyn TrainingBackend>,
        exporter: GraphExporter,
        store: Arc<dyn ModelStore>,
        work_root: PathBuf,
    ) -> Self {
        Self {
            projects,
            registry,
            converter,
            backend,
            exporter,
            store,
            work_root,
            device: None,
            reserved: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Train on `device` instead of detecting one per job.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    pub async fn project_exists(&self, project_id: i64) -> Result<bool> {
        self.projects.exists(project_id).await
    }

    /// Whether a job in flight has claimed `name`.
    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved
            .lock()
            .map(|names| names.contains(name))
            .unwrap_or(true)
    }

    /// Validate `request` and start the job in the background.
    ///
    /// Validation failures are returned here and no job is started.
    pub async fn start(&self, project_id: i64, request: TrainRequest) -> Result<ProgressStream> {
        request.validate()?;

        let store = Arc::clone(&self.store);
        let name = request.name.clone();
        if run_blocking(move || store.get_by_name(&name)).await?.is_some() {
            return Err(TrainpipeError::validation(
                "name",
                format!("a model named {:?} already exists", request.name),
            ));
        }
        if !self.projects.exists(project_id).await? {
            return Err(TrainpipeError::NotFound {
                entity: "project",
                id: project_id.to_string(),
            });
        }
        let reservation = NameReservation::acquire(&self.reserved, &request.name)?;

        let job_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let epochs = request.epochs;

        info!(
            "Starting training job {} for project {}: {} from {} ({} epochs, {})",
            job_id, project_id, request.name, request.base_model, request.epochs, request.resolution
        );

        let job = Job {
            id: job_id,
            project_id,
            request,
            orchestrator: self.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(async move {
            let _reservation = reservation;
            let mut queue = JobSender::new(tx);
            job.run(&mut queue).await;
        });

        Ok(ProgressStream {
            rx,
            cancel,
            job_id,
            epochs,
            stage: JobStage::Init,
            finished: false,
        })
    }
}

/// State moved into the background task.
struct Job {
    id: Uuid,
    project_id: i64,
    request: TrainRequest,
    orchestrator: TrainingOrchestrator,
    cancel: CancellationToken,
}

impl Job {
    async fn run(self, queue: &mut JobSender) {
        let outcome = self.execute(queue).await;

        // Working directories are gone by the time the terminal message goes out.
        match outcome {
            Ok(record) => {
                info!("Training job {} finished: {}", self.id, record.model_path);
                queue.send(JobStage::Done, ProgressMessage::ready("model trained"));
                queue.send(JobStage::Done, ProgressMessage::result(record));
            }
            Err(_) if self.cancel.is_cancelled() => {
                info!("Training job {} cancelled", self.id);
                queue.send(
                    JobStage::Cancelled,
                    ProgressMessage::error("training cancelled"),
                );
            }
            Err(e) => {
                error!("Training job {} failed: {}", self.id, e);
                queue.send(JobStage::Error, ProgressMessage::error(e.to_string()));
            }
        }
    }

    async fn execute(&self, queue: &mut JobSender) -> Result<TrainedModelRecord> {
        let orch = &self.orchestrator;
        let cancel = &self.cancel;

        tokio::fs::create_dir_all(&orch.work_root)
            .await
            .with_path(&orch.work_root)?;
        let work = tempfile::Builder::new()
            .prefix(&format!("job-{}-", self.id))
            .tempdir_in(&orch.work_root)
            .with_path(&orch.work_root)?;
        debug!("Job {} working in {}", self.id, work.path().display());

        queue.send(JobStage::Init, ProgressMessage::loading("preparing dataset"));
        let dataset = async {
            let snapshot = orch.projects.snapshot(self.project_id).await?;
            DatasetBuilder::new(orch.converter.clone())
                .with_val_split(self.request.val_split)?
                .build(&snapshot, work.path(), cancel)
                .await
        }
        .await
        .map_err(TrainpipeError::into_dataset_error)?;
        queue.send(
            JobStage::DatasetReady,
            ProgressMessage::ready("dataset prepared"),
        );

        queue.send(
            JobStage::DatasetReady,
            ProgressMessage::loading("building model"),
        );
        let checkpoint = orch.registry.checkpoint_path(&self.request.base_model);
        if !tokio::fs::try_exists(&checkpoint).await.unwrap_or(false) {
            return Err(TrainpipeError::Training {
                message: format!(
                    "base model {} is not installed (missing {})",
                    self.request.base_model,
                    checkpoint.display()
                ),
            });
        }
        queue.send(JobStage::ModelLoaded, ProgressMessage::ready("model built"));
        cancel.check()?;

        queue.send(JobStage::Training, ProgressMessage::loading("training model"));
        let device = match orch.device {
            Some(device) => device,
            None => tokio::task::spawn_blocking(Device::detect)
                .await
                .unwrap_or(Device::Cpu),
        };
        let run = TrainingRun {
            checkpoint,
            data_manifest: dataset.manifest_path.clone(),
            epochs: self.request.epochs,
            device,
            project_dir: work.path().join("run"),
        };
        let best = orch
            .backend
            .train(
                &run,
                &mut |report: EpochReport| {
                    queue.send(JobStage::Training, ProgressMessage::epoch(report))
                },
                cancel,
            )
            .await
            .map_err(TrainpipeError::into_training_error)?;
        cancel.check()?;

        let model_path = orch
            .exporter
            .export(
                &best,
                &self.request.name,
                self.request.resolution,
                work.path(),
                cancel,
            )
            .await?;

        let store = Arc::clone(&orch.store);
        let record = NewModelRecord {
            project_id: self.project_id,
            name: self.request.name.clone(),
            model_type: ModelType::Yolo,
            base_model: self.request.base_model.clone(),
            model_path: model_path.clone(),
        };
        let created = run_blocking(move || store.create(record)).await;
        match created {
            Ok(record) => Ok(record),
            Err(e) => {
                let artifact = orch.exporter.artifact_root().join(&model_path);
                if let Err(remove_err) = tokio::fs::remove_file(&artifact).await {
                    warn!(
                        "Failed to remove orphaned artifact {}: {}",
                        artifact.display(),
                        remove_err
                    );
                }
                Err(e)
            }
        }
    }
}

/// Producer side of a job queue.
///
/// Dropping it before a terminal message was sent (early return, panic)
/// pushes an error so the consumer always sees the stream end.
struct JobSender {
    tx: JobQueue,
    terminal_sent: bool,
}

impl JobSender {
    fn new(tx: JobQueue) -> Self {
        Self {
            tx,
            terminal_sent: false,
        }
    }

    fn send(&mut self, stage: JobStage, message: ProgressMessage) {
        if self.terminal_sent {
            return;
        }
        self.terminal_sent = message.is_terminal();
        // A closed receiver means the consumer is gone; the job is cancelled
        // through the stream's drop.
        let _ = self.tx.send((stage, message));
    }
}

impl Drop for JobSender {
    fn drop(&mut self) {
        if !self.terminal_sent {
            let _ = self.tx.send((
                JobStage::Error,
                ProgressMessage::error("training job ended unexpectedly"),
            ));
        }
    }
}

/// Keeps a model name claimed while its job runs.
struct NameReservation {
    names: Arc<Mutex<HashSet<String>>>,
    name: String,
}

impl NameReservation {
    fn acquire(names: &Arc<Mutex<HashSet<String>>>, name: &str) -> Result<Self> {
        let mut guard = names
            .lock()
            .map_err(|_| TrainpipeError::Other("job name registry poisoned".into()))?;
        if !guard.insert(name.to_string()) {
            return Err(TrainpipeError::validation(
                "name",
                format!("a model named {name:?} is already being trained"),
            ));
        }
        Ok(Self {
            names: Arc::clone(names),
            name: name.to_string(),
        })
    }
}

impl Drop for NameReservation {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.names.lock() {
            guard.remove(&self.name);
        }
    }
}

/// Consumer side of a job: yields progress messages in order and ends after
/// the first terminal one.
///
/// Dropping the stream before it finished cancels the job.
pub struct ProgressStream {
    rx: mpsc::UnboundedReceiver<(JobStage, ProgressMessage)>,
    cancel: CancellationToken,
    job_id: Uuid,
    epochs: u32,
    stage: JobStage,
    finished: bool,
}

impl ProgressStream {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Stage of the last message received.
    pub fn stage(&self) -> JobStage {
        self.stage
    }

    /// Request cancellation; the job still reports a terminal message.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn next(&mut self) -> Option<ProgressMessage> {
        if self.finished {
            return None;
        }
        let Some((stage, message)) = self.rx.recv().await else {
            self.finished = true;
            return None;
        };

        self.stage = if message.epoch_index() == Some(self.epochs) {
            JobStage::Exporting
        } else {
            stage
        };
        if message.is_terminal() {
            self.finished = true;
        }
        Some(message)
    }

    /// Drain the remaining messages.
    pub async fn collect(mut self) -> Vec<ProgressMessage> {
        let mut messages = Vec::new();
        while let Some(message) = self.next().await {
            messages.push(message);
        }
        messages
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressMessage> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|message| (message, stream))
        })
    }
}

impl Drop for ProgressStream {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Progress stream for job {} dropped early", self.job_id);
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoragePaths;
    use crate::dataset::NativeYoloConverter;
    use crate::export::onnx::{decode_model, encode_model};
    use crate::export::surgery::tests::detection_model;
    use crate::export::{BlobCompiler, CheckpointExporter};
    use crate::network::Downloader;
    use crate::project::FsProjectSource;
    use crate::resolution::Resolution;
    use crate::store::SqliteModelStore;
    use crate::training::types::StatusType;
    use crate::training::EpochCallback;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::path::Path;
    use tempfile::TempDir;

    const PROJECT: i64 = 1;

    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Succeed,
        Fail,
        WaitForCancel,
        Panic,
    }

    /// Reports epochs without training; remembers the split it was given.
    struct FakeBackend {
        mode: Mode,
        split: Arc<Mutex<Option<(usize, usize)>>>,
    }

    fn count_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[async_trait]
    impl TrainingBackend for FakeBackend {
        async fn train(
            &self,
            run: &TrainingRun,
            on_epoch: EpochCallback<'_>,
            cancel: &CancellationToken,
        ) -> Result<PathBuf> {
            let root = run.data_manifest.parent().unwrap();
            *self.split.lock().unwrap() = Some((
                count_files(&root.join("images").join("train")),
                count_files(&root.join("images").join("val")),
            ));

            for epoch in 1..=run.epochs {
                cancel.check()?;
                let mut metrics = Map::new();
                metrics.insert("loss".into(), json!(1.0 / f64::from(epoch)));
                on_epoch(EpochReport { epoch, metrics });

                match self.mode {
                    Mode::WaitForCancel => {
                        cancel.cancelled().await;
                        return Err(TrainpipeError::Cancelled);
                    }
                    Mode::Panic => panic!("trainer crashed"),
                    _ => {}
                }
            }
            if self.mode == Mode::Fail {
                return Err(TrainpipeError::Other("CUDA out of memory".into()));
            }

            let weights = run.project_dir.join("train").join("weights");
            std::fs::create_dir_all(&weights)?;
            let best = weights.join("best.pt");
            std::fs::write(&best, b"weights")?;
            Ok(best)
        }
    }

    struct FakeOnnx;

    #[async_trait]
    impl CheckpointExporter for FakeOnnx {
        async fn export_onnx(
            &self,
            _checkpoint: &Path,
            _resolution: Resolution,
            out_dir: &Path,
            _cancel: &CancellationToken,
        ) -> Result<PathBuf> {
            let path = out_dir.join("best.onnx");
            tokio::fs::write(&path, encode_model(&detection_model())).await?;
            Ok(path)
        }
    }

    /// Copies the ONNX bytes so the published artifact can be decoded.
    struct CopyCompiler;

    #[async_trait]
    impl BlobCompiler for CopyCompiler {
        async fn compile(
            &self,
            onnx: &Path,
            out_dir: &Path,
            _cancel: &CancellationToken,
        ) -> Result<PathBuf> {
            let path = out_dir.join("best.blob");
            tokio::fs::copy(onnx, &path).await?;
            Ok(path)
        }
    }

    struct FailingCompiler;

    #[async_trait]
    impl BlobCompiler for FailingCompiler {
        async fn compile(
            &self,
            _onnx: &Path,
            _out_dir: &Path,
            _cancel: &CancellationToken,
        ) -> Result<PathBuf> {
            Err(TrainpipeError::Other("compile_blob.py exited with status 1".into()))
        }
    }

    struct Fixture {
        _dir: TempDir,
        paths: StoragePaths,
        work: PathBuf,
        store: Arc<SqliteModelStore>,
        split: Arc<Mutex<Option<(usize, usize)>>>,
        orchestrator: TrainingOrchestrator,
    }

    fn task(id: usize) -> serde_json::Value {
        json!({
            "id": id,
            "data": {"image": format!("/data/upload/{PROJECT}/img{id:02}.jpg")},
            "annotations": [{
                "result": [{
                    "type": "rectanglelabels",
                    "value": {"x": 10, "y": 20, "width": 30, "height": 40, "rectanglelabels": ["part"]}
                }]
            }]
        })
    }

    fn fixture(tasks: usize, mode: Mode, compiler: Arc<dyn BlobCompiler>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let paths = StoragePaths::from_root(dir.path());

        let project = paths.projects_root.join(PROJECT.to_string());
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(
            project.join("label_config.json"),
            json!({
                "label": {
                    "type": "RectangleLabels",
                    "inputs": [{"type": "Image", "value": "image"}],
                    "labels": ["part", "defect"]
                }
            })
            .to_string(),
        )
        .unwrap();
        let all: Vec<_> = (0..tasks).map(task).collect();
        std::fs::write(project.join("tasks.json"), json!(all).to_string()).unwrap();

        let uploads = paths.upload_root.join(PROJECT.to_string());
        std::fs::create_dir_all(&uploads).unwrap();
        for i in 0..tasks {
            std::fs::write(uploads.join(format!("img{i:02}.jpg")), b"jpg").unwrap();
        }

        let base = paths.models_root.join("yolov8n");
        std::fs::create_dir_all(&base).unwrap();
        std::fs::write(base.join("model.pt"), b"base").unwrap();

        let registry = BaseModelRegistry::from_paths(&paths, Downloader::new().unwrap());
        let store = Arc::new(SqliteModelStore::in_memory().unwrap());
        let split = Arc::new(Mutex::new(None));
        let exporter = GraphExporter::new(
            Arc::new(FakeOnnx),
            compiler,
            paths.artifact_root.clone(),
        );
        let work = dir.path().join("work");
        let orchestrator = TrainingOrchestrator::new(
            Arc::new(FsProjectSource::from_paths(&paths)),
            Arc::new(registry),
            Arc::new(NativeYoloConverter::new()),
            Arc::new(FakeBackend {
                mode,
                split: split.clone(),
            }),
            exporter,
            store.clone(),
            work.clone(),
        )
        .with_device(Device::Cpu);

        Fixture {
            _dir: dir,
            paths,
            work,
            store,
            split,
            orchestrator,
        }
    }

    fn logs(messages: &[ProgressMessage]) -> Vec<String> {
        messages
            .iter()
            .map(|m| m.log.clone().unwrap_or_else(|| "<result>".into()))
            .collect()
    }

    fn assert_single_error(messages: &[ProgressMessage]) -> String {
        let errors: Vec<_> = messages.iter().filter(|m| m.is_error()).collect();
        assert_eq!(errors.len(), 1, "{:?}", logs(messages));
        assert!(messages.last().unwrap().is_error());
        assert!(messages.iter().all(|m| m.result.is_none()));
        errors[0].log.clone().unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_job() {
        let fx = fixture(20, Mode::Succeed, Arc::new(CopyCompiler));
        let request = TrainRequest::new("widgets")
            .with_epochs(2)
            .with_resolution("320x320".parse().unwrap());

        let messages = fx
            .orchestrator
            .start(PROJECT, request)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(
            logs(&messages),
            vec![
                "preparing dataset",
                "dataset prepared",
                "building model",
                "model built",
                "training model",
                "epoch 1: {\"loss\":1.0}",
                "epoch 2: {\"loss\":0.5}",
                "model trained",
                "<result>",
            ]
        );
        assert_eq!(messages[0].status_type, Some(StatusType::Loading));
        assert_eq!(messages[1].status_type, Some(StatusType::Ready));
        assert_eq!(*fx.split.lock().unwrap(), Some((18, 2)));

        let record = messages.last().unwrap().result.clone().unwrap();
        assert_eq!(record.name, "widgets");
        assert_eq!(record.model_path, "widgets.blob");
        assert_eq!(record.project_id, PROJECT);
        assert_eq!(record.model_type, ModelType::Yolo);
        assert_eq!(fx.store.list_for_project(PROJECT).unwrap(), vec![record]);

        let blob = std::fs::read(fx.paths.artifact_root.join("widgets.blob")).unwrap();
        let graph = decode_model(&blob).unwrap().graph.unwrap();
        let input = &graph.input[0];
        assert_eq!(
            input.static_dims(),
            Some(vec![Some(1), Some(3), Some(320), Some(320)])
        );

        assert_eq!(count_files(&fx.work), 0, "job directory must be removed");
    }

    #[tokio::test]
    async fn test_epochs_in_order_then_exporting() {
        let fx = fixture(5, Mode::Succeed, Arc::new(CopyCompiler));
        let mut stream = fx
            .orchestrator
            .start(PROJECT, TrainRequest::new("ordered").with_epochs(3))
            .await
            .unwrap();
        assert_eq!(stream.stage(), JobStage::Init);

        let mut seen = Vec::new();
        while let Some(message) = stream.next().await {
            if let Some(epoch) = message.epoch_index() {
                seen.push(epoch);
                if epoch == 3 {
                    assert_eq!(stream.stage(), JobStage::Exporting);
                } else {
                    assert_eq!(stream.stage(), JobStage::Training);
                }
            }
            if message.result.is_some() {
                assert_eq!(seen, vec![1, 2, 3]);
            }
        }
        assert_eq!(stream.stage(), JobStage::Done);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_training_failure_reports_once() {
        let fx = fixture(5, Mode::Fail, Arc::new(CopyCompiler));
        let messages = fx
            .orchestrator
            .start(PROJECT, TrainRequest::new("broken").with_epochs(2))
            .await
            .unwrap()
            .collect()
            .await;

        let log = assert_single_error(&messages);
        assert!(log.contains("CUDA out of memory"), "{log}");
        assert!(fx.store.list_for_project(PROJECT).unwrap().is_empty());
        assert_eq!(count_files(&fx.work), 0);
    }

    #[tokio::test]
    async fn test_export_failure_leaves_no_record() {
        let fx = fixture(5, Mode::Succeed, Arc::new(FailingCompiler));
        let messages = fx
            .orchestrator
            .start(PROJECT, TrainRequest::new("unexported").with_epochs(1))
            .await
            .unwrap()
            .collect()
            .await;

        assert_single_error(&messages);
        assert!(fx.store.get_by_name("unexported").unwrap().is_none());
        assert!(!fx.paths.artifact_root.join("unexported.blob").exists());
    }

    #[tokio::test]
    async fn test_dataset_failure_stops_before_training() {
        let fx = fixture(5, Mode::Succeed, Arc::new(CopyCompiler));
        std::fs::remove_dir_all(fx.paths.upload_root.join(PROJECT.to_string())).unwrap();

        let messages = fx
            .orchestrator
            .start(PROJECT, TrainRequest::new("no-images"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_single_error(&messages);
        assert_eq!(logs(&messages)[0], "preparing dataset");
        assert!(messages.iter().all(|m| m.data.is_none()));
        assert!(fx.split.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_base_model_is_training_error() {
        let fx = fixture(5, Mode::Succeed, Arc::new(CopyCompiler));
        let messages = fx
            .orchestrator
            .start(PROJECT, TrainRequest::new("m").with_base_model("yolov8s"))
            .await
            .unwrap()
            .collect()
            .await;

        let log = assert_single_error(&messages);
        assert!(log.contains("yolov8s is not installed"), "{log}");
        assert!(logs(&messages).contains(&"dataset prepared".to_string()));
    }

    #[tokio::test]
    async fn test_synchronous_validation() {
        let fx = fixture(2, Mode::Succeed, Arc::new(CopyCompiler));
        fx.store
            .create(NewModelRecord {
                project_id: PROJECT,
                name: "taken".into(),
                model_type: ModelType::Yolo,
                base_model: "yolov8n".into(),
                model_path: "taken.blob".into(),
            })
            .unwrap();

        let taken = fx.orchestrator.start(PROJECT, TrainRequest::new("taken")).await;
        assert!(matches!(taken, Err(TrainpipeError::Validation { ref field, .. }) if field == "name"));

        let bad_epochs = fx
            .orchestrator
            .start(PROJECT, TrainRequest::new("x").with_epochs(0))
            .await;
        assert!(matches!(bad_epochs, Err(TrainpipeError::Validation { .. })));

        let unknown = fx.orchestrator.start(99, TrainRequest::new("x")).await;
        assert!(matches!(unknown, Err(TrainpipeError::NotFound { .. })));

        assert!(!fx.work.exists(), "no job may start after a validation error");
    }

    #[tokio::test]
    async fn test_cancel_emits_terminal_error() {
        let fx = fixture(5, Mode::WaitForCancel, Arc::new(CopyCompiler));
        let mut stream = fx
            .orchestrator
            .start(PROJECT, TrainRequest::new("cancelled").with_epochs(5))
            .await
            .unwrap();

        while let Some(message) = stream.next().await {
            if message.epoch_index() == Some(1) {
                break;
            }
        }
        stream.cancel();

        let rest = stream.collect().await;
        assert_eq!(logs(&rest), vec!["training cancelled"]);
        assert!(rest[0].is_error());
        assert!(fx.store.get_by_name("cancelled").unwrap().is_none());
        assert_eq!(count_files(&fx.work), 0);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_job() {
        let fx = fixture(5, Mode::WaitForCancel, Arc::new(CopyCompiler));
        let mut stream = fx
            .orchestrator
            .start(PROJECT, TrainRequest::new("abandoned").with_epochs(5))
            .await
            .unwrap();
        while let Some(message) = stream.next().await {
            if message.epoch_index().is_some() {
                break;
            }
        }

        let token = stream.cancellation_token();
        drop(stream);
        assert!(token.is_cancelled());

        // The name is released once the background task has cleaned up.
        let mut restarted = None;
        for _ in 0..200 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if count_files(&fx.work) == 0 {
                restarted = fx
                    .orchestrator
                    .start(PROJECT, TrainRequest::new("abandoned").with_epochs(1))
                    .await
                    .ok();
                if restarted.is_some() {
                    break;
                }
            }
        }
        let restarted = restarted.expect("name should be released after cancellation");
        restarted.cancel();
    }

    #[tokio::test]
    async fn test_name_reserved_while_training() {
        let fx = fixture(5, Mode::WaitForCancel, Arc::new(CopyCompiler));
        let first = fx
            .orchestrator
            .start(PROJECT, TrainRequest::new("busy"))
            .await
            .unwrap();

        let second = fx.orchestrator.start(PROJECT, TrainRequest::new("busy")).await;
        assert!(matches!(second, Err(TrainpipeError::Validation { .. })));
        assert!(fx.orchestrator.is_reserved("busy"));
        assert!(!fx.orchestrator.is_reserved("idle"));

        first.cancel();
        let rest = first.collect().await;
        assert!(rest.last().unwrap().is_error());
    }

    #[tokio::test]
    async fn test_crashed_job_still_terminates_stream() {
        let fx = fixture(5, Mode::Panic, Arc::new(CopyCompiler));
        let messages = fx
            .orchestrator
            .start(PROJECT, TrainRequest::new("crash").with_epochs(2))
            .await
            .unwrap()
            .collect()
            .await;

        let log = assert_single_error(&messages);
        assert_eq!(log, "training job ended unexpectedly");
        assert_eq!(messages.iter().filter(|m| m.data.is_some()).count(), 1);
    }
}
