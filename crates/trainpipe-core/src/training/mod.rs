//! Training jobs and their progress stream.

mod backend;
mod orchestrator;
mod types;

pub use backend::{find_best_checkpoint, EpochCallback, TrainingBackend, TrainingRun, YoloScriptBackend};
pub use orchestrator::{ProgressStream, TrainingOrchestrator};
pub use types::{
    validate_model_name, EpochReport, JobStage, ProgressMessage, StatusType, TrainRequest,
    MAX_MODEL_NAME_LEN,
};
