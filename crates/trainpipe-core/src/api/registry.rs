//! Base model catalog methods on TrainpipeApi.

use crate::error::Result;
use crate::platform::run_blocking;
use crate::registry::{BaseModelEntry, InstallReport, InstallSelection, ModelTask};
use crate::TrainpipeApi;
use std::sync::Arc;

impl TrainpipeApi {
    /// Every base model manifest, with its install state.
    pub async fn list_base_models(&self, task: Option<ModelTask>) -> Result<Vec<BaseModelEntry>> {
        let registry = Arc::clone(&self.registry);
        run_blocking(move || registry.list(task)).await
    }

    /// Names of the fully installed base models.
    pub async fn installed_base_models(&self, task: Option<ModelTask>) -> Result<Vec<String>> {
        let registry = Arc::clone(&self.registry);
        run_blocking(move || registry.installed_names(task)).await
    }

    pub async fn install_base_models(&self, selection: &InstallSelection) -> Result<InstallReport> {
        self.registry.install_many(selection).await
    }
}
