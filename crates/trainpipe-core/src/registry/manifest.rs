//! Base-model manifest types (`<models_root>/<name>/config.json`).

use crate::{Result, TrainpipeError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

/// Task a base model was trained for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTask {
    Classification,
    Detection,
}

impl ModelTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTask::Classification => "classification",
            ModelTask::Detection => "detection",
        }
    }
}

impl std::str::FromStr for ModelTask {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "classification" => Ok(ModelTask::Classification),
            "detection" => Ok(ModelTask::Detection),
            other => Err(format!("unknown model task: {other}")),
        }
    }
}

impl std::fmt::Display for ModelTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One asset a base model needs on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub filename: String,
    /// Served from the static root rather than kept next to the manifest.
    #[serde(rename = "static", default)]
    pub is_static: bool,
    /// Already shipped alongside the manifest; nothing to fetch.
    #[serde(default)]
    pub local: bool,
}

impl DownloadSpec {
    /// Where this asset must end up for the model to count as installed.
    pub fn destination(&self, models_root: &Path, static_root: &Path, model: &str) -> PathBuf {
        if self.is_static {
            static_root.join(model).join(&self.filename)
        } else {
            models_root.join(model).join(&self.filename)
        }
    }

    /// Where the bytes live next to the manifest.
    pub fn model_dir_path(&self, models_root: &Path, model: &str) -> PathBuf {
        models_root.join(model).join(&self.filename)
    }

    pub fn is_remote(&self) -> bool {
        !self.local
    }

    /// The declared `url`, parsed. Only `http` and `https` sources are fetched.
    pub fn source_url(&self) -> Result<Option<Url>> {
        let Some(raw) = self.url.as_deref() else {
            return Ok(None);
        };
        let url = Url::parse(raw).map_err(|e| TrainpipeError::Config {
            message: format!("invalid url {raw:?} for {}: {e}", self.filename),
        })?;
        match url.scheme() {
            "http" | "https" => Ok(Some(url)),
            other => Err(TrainpipeError::Config {
                message: format!("unsupported url scheme {other:?} for {}", self.filename),
            }),
        }
    }
}

/// Contents of a manifest file. `name` and `installed` are derived, never read.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelManifest {
    pub task: ModelTask,
    #[serde(default)]
    pub downloads: Vec<DownloadSpec>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A manifest annotated with its name and install state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaseModelEntry {
    pub name: String,
    pub task: ModelTask,
    pub downloads: Vec<DownloadSpec>,
    pub installed: bool,
    /// Any other manifest keys, e.g. `input_shape`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Which base models an install pass should cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSelection {
    All,
    Task(ModelTask),
    Names(Vec<String>),
}
