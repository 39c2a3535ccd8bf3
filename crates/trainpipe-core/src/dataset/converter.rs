//! Annotation → YOLO label conversion.

use crate::config::DatasetConfig;
use crate::error::IoResultExt;
use crate::{Result, TrainpipeError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use tracing::{debug, warn};

/// Converts exported annotation tasks into per-image label files.
///
/// Implementations write one label file per image into `<output_dir>/labels/`
/// (named after the image's file stem) plus a `classes.txt` listing class
/// names in index order.
#[async_trait]
pub trait AnnotationConverter: Send + Sync {
    async fn convert(
        &self,
        config: &Value,
        tasks_json: &Path,
        output_dir: &Path,
        format: &str,
    ) -> Result<()>;
}

/// Built-in converter for rectangle annotations.
#[derive(Debug, Clone, Default)]
pub struct NativeYoloConverter;

impl NativeYoloConverter {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Deserialize)]
struct ExportedTask {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    data: HashMap<String, Value>,
    #[serde(default)]
    annotations: Vec<Annotation>,
}

#[derive(Debug, Deserialize)]
struct Annotation {
    #[serde(default)]
    was_cancelled: bool,
    #[serde(default)]
    result: Vec<RegionResult>,
}

#[derive(Debug, Deserialize)]
struct RegionResult {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct RectangleValue {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    #[serde(default)]
    rectanglelabels: Vec<String>,
}

/// Rectangle label controls found in a parsed config.
struct LabelSchema {
    classes: Vec<String>,
    /// Data key of the image each control annotates.
    image_keys: Vec<String>,
}

impl LabelSchema {
    fn from_config(config: &Value) -> Result<Self> {
        let controls = config.as_object().ok_or_else(|| TrainpipeError::DatasetBuild {
            message: "label config is not an object".into(),
        })?;

        let mut classes: Vec<String> = Vec::new();
        let mut image_keys = Vec::new();
        for control in controls.values() {
            let is_rect = control
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.eq_ignore_ascii_case("RectangleLabels"));
            if !is_rect {
                continue;
            }

            for label in control
                .get("labels")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
            {
                if !classes.iter().any(|c| c == label) {
                    classes.push(label.to_string());
                }
            }

            for input in control
                .get("inputs")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                if let Some(key) = input.get("value").and_then(Value::as_str) {
                    image_keys.push(key.trim_start_matches('$').to_string());
                }
            }
        }

        if classes.is_empty() {
            return Err(TrainpipeError::DatasetBuild {
                message: "label config declares no RectangleLabels classes".into(),
            });
        }
        if image_keys.is_empty() {
            image_keys.push("image".to_string());
        }

        Ok(Self {
            classes,
            image_keys,
        })
    }

    fn class_index(&self, name: &str) -> Option<usize> {
        self.classes.iter().position(|c| c == name)
    }
}

#[async_trait]
impl AnnotationConverter for NativeYoloConverter {
    async fn convert(
        &self,
        config: &Value,
        tasks_json: &Path,
        output_dir: &Path,
        format: &str,
    ) -> Result<()> {
        if format != DatasetConfig::FORMAT {
            return Err(TrainpipeError::DatasetBuild {
                message: format!("unsupported annotation format: {format}"),
            });
        }

        let schema = LabelSchema::from_config(config)?;
        let raw = tokio::fs::read(tasks_json).await.with_path(tasks_json)?;
        let tasks: Vec<ExportedTask> = serde_json::from_slice(&raw)?;

        let labels_dir = output_dir.join(DatasetConfig::LABELS_DIR);
        tokio::fs::create_dir_all(&labels_dir)
            .await
            .with_path(&labels_dir)?;

        let mut written = 0usize;
        for task in &tasks {
            let Some(stem) = image_stem(task, &schema.image_keys) else {
                warn!("Task {:?} has no image reference, skipping", task.id);
                continue;
            };

            let Some(contents) = render_labels(task, &schema) else {
                debug!("Task {:?} has no boxes", task.id);
                continue;
            };

            let path = labels_dir.join(format!("{}.{}", stem, DatasetConfig::LABEL_EXTENSION));
            tokio::fs::write(&path, contents).await.with_path(&path)?;
            written += 1;
        }

        let classes_path = output_dir.join(DatasetConfig::CLASSES_FILENAME);
        let mut classes = schema.classes.join("\n");
        classes.push('\n');
        tokio::fs::write(&classes_path, classes)
            .await
            .with_path(&classes_path)?;

        debug!(
            "Converted {} of {} tasks into {} classes",
            written,
            tasks.len(),
            schema.classes.len()
        );
        Ok(())
    }
}

/// File stem of the image a task points at, without directories or query.
fn image_stem(task: &ExportedTask, image_keys: &[String]) -> Option<String> {
    let reference = image_keys
        .iter()
        .find_map(|k| task.data.get(k).and_then(Value::as_str))?;
    let without_query = reference.split(['?', '#']).next().unwrap_or(reference);
    let file_name = without_query.rsplit(['/', '\\']).next()?;
    let stem = Path::new(file_name).file_stem()?.to_str()?;
    (!stem.is_empty()).then(|| stem.to_string())
}

/// YOLO label lines for the first non-cancelled annotation with boxes.
fn render_labels(task: &ExportedTask, schema: &LabelSchema) -> Option<String> {
    let annotation = task.annotations.iter().find(|a| !a.was_cancelled)?;

    let mut out = String::new();
    for region in &annotation.result {
        if !region.kind.eq_ignore_ascii_case("rectanglelabels") {
            continue;
        }
        let Ok(rect) = serde_json::from_value::<RectangleValue>(region.value.clone()) else {
            continue;
        };
        let Some(class) = rect
            .rectanglelabels
            .first()
            .and_then(|l| schema.class_index(l))
        else {
            continue;
        };

        let w = rect.width / 100.0;
        let h = rect.height / 100.0;
        let cx = rect.x / 100.0 + w / 2.0;
        let cy = rect.y / 100.0 + h / 2.0;
        let _ = writeln!(out, "{} {:.6} {:.6} {:.6} {:.6}", class, cx, cy, w, h);
    }

    (!out.is_empty()).then_some(out)
}
