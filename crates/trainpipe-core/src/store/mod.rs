//! Trained model records.

mod sqlite;

pub use sqlite::SqliteModelStore;

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of network an artifact contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    Generic,
    #[serde(rename = "YOLO")]
    Yolo,
    MobileNetSSD,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Generic => "Generic",
            ModelType::Yolo => "YOLO",
            ModelType::MobileNetSSD => "MobileNetSSD",
        }
    }
}

impl std::str::FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Generic" => Ok(ModelType::Generic),
            "YOLO" => Ok(ModelType::Yolo),
            "MobileNetSSD" => Ok(ModelType::MobileNetSSD),
            other => Err(format!("unknown model type: {other}")),
        }
    }
}

/// A persisted, exported model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModelRecord {
    pub id: i64,
    #[serde(rename = "project")]
    pub project_id: i64,
    pub name: String,
    pub model_type: ModelType,
    pub base_model: String,
    /// Artifact file name relative to the artifact root.
    pub model_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrainedModelRecord {
    /// Records created ahead of an upload have no artifact yet.
    pub fn has_artifact(&self) -> bool {
        !self.model_path.is_empty()
    }
}

/// Client request creating a record in a project before its artifact exists.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateModelRequest {
    pub name: String,
    pub model_type: ModelType,
    pub base_model: String,
}

/// Fields supplied when a record is created.
#[derive(Debug, Clone)]
pub struct NewModelRecord {
    pub project_id: i64,
    pub name: String,
    pub model_type: ModelType,
    pub base_model: String,
    pub model_path: String,
}

/// Administrative update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelRecordPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model_type: Option<ModelType>,
    #[serde(default)]
    pub base_model: Option<String>,
}

impl ModelRecordPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.model_type.is_none() && self.base_model.is_none()
    }
}

/// Persistence for trained model records. Names are unique.
pub trait ModelStore: Send + Sync {
    /// Insert a record; a taken name is a validation error.
    fn create(&self, record: NewModelRecord) -> Result<TrainedModelRecord>;

    fn get(&self, id: i64) -> Result<Option<TrainedModelRecord>>;

    fn get_by_name(&self, name: &str) -> Result<Option<TrainedModelRecord>>;

    /// Records of one project, most recently updated first.
    fn list_for_project(&self, project_id: i64) -> Result<Vec<TrainedModelRecord>>;

    fn update(&self, id: i64, patch: &ModelRecordPatch) -> Result<Option<TrainedModelRecord>>;

    /// Point the record at a newly published artifact.
    fn set_model_path(&self, id: i64, model_path: &str) -> Result<Option<TrainedModelRecord>>;

    /// Remove a record, returning it if it existed.
    fn delete(&self, id: i64) -> Result<Option<TrainedModelRecord>>;
}
