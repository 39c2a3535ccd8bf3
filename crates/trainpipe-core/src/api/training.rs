//! Training methods on TrainpipeApi.

use crate::error::Result;
use crate::training::{ProgressStream, TrainRequest};
use crate::TrainpipeApi;

impl TrainpipeApi {
    /// Start a training job for `project_id`.
    ///
    /// Request errors are returned immediately; everything after that is
    /// reported through the returned stream.
    pub async fn train(&self, project_id: i64, request: TrainRequest) -> Result<ProgressStream> {
        self.orchestrator.start(project_id, request).await
    }

    /// Deploy the helper scripts and create the Python environment.
    pub async fn setup_environment(&self) -> Result<()> {
        self.scripts.ensure_environment().await
    }

    /// Whether the Python environment exists.
    pub fn environment_ready(&self) -> bool {
        self.scripts.is_ready()
    }
}
