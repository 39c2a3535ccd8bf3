//! Access to a project's label configuration, annotated tasks and uploads.

use crate::config::StoragePaths;
use crate::{Result, TrainpipeError};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const LABEL_CONFIG_FILENAME: &str = "label_config.json";
pub const TASKS_FILENAME: &str = "tasks.json";

/// Everything the dataset builder needs from a project.
#[derive(Debug, Clone)]
pub struct ProjectSnapshot {
    pub id: i64,
    /// Parsed labeling config, keyed by control tag name.
    pub label_config: Value,
    /// Exported tasks that carry at least one annotation.
    pub tasks: Vec<Value>,
    /// Directory holding the project's uploaded images.
    pub upload_dir: PathBuf,
}

/// Supplies project data to the training pipeline.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn exists(&self, project_id: i64) -> Result<bool>;

    /// Load a snapshot; `NotFound` when the project does not exist.
    async fn snapshot(&self, project_id: i64) -> Result<ProjectSnapshot>;
}

/// Projects stored as JSON exports on disk.
///
/// ```text
/// <projects_root>/<id>/label_config.json
/// <projects_root>/<id>/tasks.json
/// <upload_root>/<id>/<image files>
/// ```
#[derive(Debug, Clone)]
pub struct FsProjectSource {
    projects_root: PathBuf,
    upload_root: PathBuf,
}

impl FsProjectSource {
    pub fn new(projects_root: PathBuf, upload_root: PathBuf) -> Self {
        Self {
            projects_root,
            upload_root,
        }
    }

    pub fn from_paths(paths: &StoragePaths) -> Self {
        Self::new(paths.projects_root.clone(), paths.upload_root.clone())
    }

    fn project_dir(&self, project_id: i64) -> PathBuf {
        self.projects_root.join(project_id.to_string())
    }
}

#[async_trait]
impl ProjectSource for FsProjectSource {
    async fn exists(&self, project_id: i64) -> Result<bool> {
        let path = self.project_dir(project_id).join(LABEL_CONFIG_FILENAME);
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn snapshot(&self, project_id: i64) -> Result<ProjectSnapshot> {
        let dir = self.project_dir(project_id);
        let label_config = match read_json(&dir.join(LABEL_CONFIG_FILENAME)).await? {
            Some(v) => v,
            None => {
                return Err(TrainpipeError::NotFound {
                    entity: "project",
                    id: project_id.to_string(),
                })
            }
        };

        let tasks = match read_json(&dir.join(TASKS_FILENAME)).await? {
            Some(Value::Array(tasks)) => tasks,
            Some(_) => {
                return Err(TrainpipeError::Json {
                    message: format!("{} is not a JSON array", TASKS_FILENAME),
                    source: None,
                })
            }
            None => Vec::new(),
        };

        let total = tasks.len();
        let tasks: Vec<Value> = tasks.into_iter().filter(has_annotations).collect();
        debug!(
            "Project {}: {} of {} tasks annotated",
            project_id,
            tasks.len(),
            total
        );

        Ok(ProjectSnapshot {
            id: project_id,
            label_config,
            tasks,
            upload_dir: self.upload_root.join(project_id.to_string()),
        })
    }
}

fn has_annotations(task: &Value) -> bool {
    task.get("annotations")
        .and_then(Value::as_array)
        .is_some_and(|a| !a.is_empty())
}

async fn read_json(path: &Path) -> Result<Option<Value>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TrainpipeError::io_with_path(e, path)),
    }
}
