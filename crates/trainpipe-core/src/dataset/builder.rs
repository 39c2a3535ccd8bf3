//! Builds a YOLO dataset directory from a project snapshot.
//!
//! Layout produced inside a fresh temporary directory:
//!
//! ```text
//! <dir>/classes.txt
//! <dir>/data.yaml
//! <dir>/images/{train,val}/<stem>.<ext>   (symlinks into the upload dir)
//! <dir>/labels/{train,val}/<stem>.txt
//! ```

use super::converter::AnnotationConverter;
use crate::cancel::CancellationToken;
use crate::config::DatasetConfig;
use crate::error::IoResultExt;
use crate::platform::create_link;
use crate::project::ProjectSnapshot;
use crate::retry::{retry_async, RetryPolicy};
use crate::{Result, TrainpipeError};
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// A built dataset. Dropping it removes the directory.
#[derive(Debug)]
pub struct PreparedDataset {
    dir: TempDir,
    pub manifest_path: PathBuf,
    pub classes: Vec<String>,
    pub train_count: usize,
    pub val_count: usize,
    /// Images dropped because they had no upload or could not be moved.
    pub skipped: usize,
}

impl PreparedDataset {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn image_count(&self) -> usize {
        self.train_count + self.val_count
    }
}

/// An image and its label file, by file name.
#[derive(Debug, Clone)]
struct Pair {
    image: String,
    label: String,
}

/// Dataset builder.
#[derive(Clone)]
pub struct DatasetBuilder {
    converter: Arc<dyn AnnotationConverter>,
    val_split: f64,
    move_retry: RetryPolicy,
}

impl DatasetBuilder {
    pub fn new(converter: Arc<dyn AnnotationConverter>) -> Self {
        Self {
            converter,
            val_split: DatasetConfig::DEFAULT_VAL_SPLIT,
            move_retry: RetryPolicy::new()
                .with_max_attempts(DatasetConfig::MOVE_RETRY_ATTEMPTS)
                .with_base_delay(DatasetConfig::MOVE_RETRY_BASE_DELAY)
                .with_max_delay(DatasetConfig::MOVE_RETRY_MAX_DELAY),
        }
    }

    pub fn with_val_split(mut self, val_split: f64) -> Result<Self> {
        validate_val_split(val_split)?;
        self.val_split = val_split;
        Ok(self)
    }

    pub fn val_split(&self) -> f64 {
        self.val_split
    }

    /// Build the dataset inside a new temporary directory under `work_root`.
    pub async fn build(
        &self,
        snapshot: &ProjectSnapshot,
        work_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<PreparedDataset> {
        let dir = tempfile::Builder::new()
            .prefix("dataset-")
            .tempdir_in(work_root)
            .with_path(work_root)?;
        let root = dir.path().to_path_buf();

        let tasks_json = root.join(DatasetConfig::TASKS_EXPORT_FILENAME);
        let exported = serde_json::to_vec(&snapshot.tasks)?;
        tokio::fs::write(&tasks_json, exported)
            .await
            .with_path(&tasks_json)?;

        self.converter
            .convert(
                &snapshot.label_config,
                &tasks_json,
                &root,
                DatasetConfig::FORMAT,
            )
            .await?;
        cancel.check()?;

        let classes = read_classes(&root).await?;
        create_split_dirs(&root).await?;

        let (pairs, unmatched) = link_images(&root, &snapshot.upload_dir).await?;
        if pairs.is_empty() {
            return Err(TrainpipeError::DatasetBuild {
                message: format!(
                    "no annotated images found for project {} in {}",
                    snapshot.id,
                    snapshot.upload_dir.display()
                ),
            });
        }
        cancel.check()?;

        let (train_count, val_count, failed_moves) =
            self.split(&root, pairs, cancel).await?;

        let manifest_path = write_manifest(&root, &classes).await?;
        info!(
            "Dataset ready at {}: {} train / {} val, {} classes",
            root.display(),
            train_count,
            val_count,
            classes.len()
        );

        Ok(PreparedDataset {
            dir,
            manifest_path,
            classes,
            train_count,
            val_count,
            skipped: unmatched + failed_moves,
        })
    }

    /// Shuffle and move pairs into `val` then `train`.
    async fn split(
        &self,
        root: &Path,
        mut pairs: Vec<Pair>,
        cancel: &CancellationToken,
    ) -> Result<(usize, usize, usize)> {
        pairs.shuffle(&mut rand::rng());
        let target_val = val_count(pairs.len(), self.val_split);

        let (mut train, mut val, mut failed) = (0, 0, 0);
        for (i, pair) in pairs.iter().enumerate() {
            cancel.check()?;
            let subset = if i < target_val {
                DatasetConfig::VAL_DIR
            } else {
                DatasetConfig::TRAIN_DIR
            };

            let (result, report) = retry_async(
                &self.move_retry,
                || move_pair(root, pair, subset),
                |_: &TrainpipeError| true,
            )
            .await;

            match result {
                Ok(()) if subset == DatasetConfig::VAL_DIR => val += 1,
                Ok(()) => train += 1,
                Err(e) => {
                    warn!(
                        "Skipping {} after {} attempts: {}",
                        pair.image, report.attempts, e
                    );
                    failed += 1;
                }
            }
        }
        Ok((train, val, failed))
    }
}

/// Reject splits outside `[0, 1)`.
pub fn validate_val_split(val_split: f64) -> Result<()> {
    if val_split.is_finite() && (0.0..1.0).contains(&val_split) {
        Ok(())
    } else {
        Err(TrainpipeError::validation(
            "val_split",
            format!("must be in [0, 1), got {val_split}"),
        ))
    }
}

/// Number of validation images: `ceil(n * split)`, tolerant of float error.
pub fn val_count(n: usize, val_split: f64) -> usize {
    let raw = n as f64 * val_split;
    let count = (raw - 1e-9).ceil().max(0.0) as usize;
    count.min(n)
}

async fn read_classes(root: &Path) -> Result<Vec<String>> {
    let path = root.join(DatasetConfig::CLASSES_FILENAME);
    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| TrainpipeError::DatasetBuild {
            message: format!("converter produced no {}: {}", DatasetConfig::CLASSES_FILENAME, e),
        })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

async fn create_split_dirs(root: &Path) -> Result<()> {
    for top in [DatasetConfig::IMAGES_DIR, DatasetConfig::LABELS_DIR] {
        for subset in [DatasetConfig::TRAIN_DIR, DatasetConfig::VAL_DIR] {
            let dir = root.join(top).join(subset);
            tokio::fs::create_dir_all(&dir).await.with_path(&dir)?;
        }
    }
    Ok(())
}

/// Link the upload behind every label file into `images/`.
///
/// Returns the linked pairs and how many labels had no usable upload.
async fn link_images(root: &Path, upload_dir: &Path) -> Result<(Vec<Pair>, usize)> {
    let labels = list_files(&root.join(DatasetConfig::LABELS_DIR)).await?;
    let uploads = list_files(upload_dir).await.unwrap_or_else(|e| {
        warn!("Upload directory unreadable: {}", e);
        Vec::new()
    });
    let images_dir = root.join(DatasetConfig::IMAGES_DIR);

    let mut pairs = Vec::with_capacity(labels.len());
    let mut unmatched = 0;
    for label in labels {
        let Some(stem) = Path::new(&label).file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let Some(upload) = find_upload(&uploads, stem) else {
            warn!("No upload matches label {}, skipping", label);
            unmatched += 1;
            continue;
        };

        let image = linked_image_name(stem, upload);
        if let Err(e) = create_link(&upload_dir.join(upload), &images_dir.join(&image)) {
            warn!("{}", e);
            unmatched += 1;
            continue;
        }
        pairs.push(Pair { image, label });
    }

    debug!("Linked {} images", pairs.len());
    Ok((pairs, unmatched))
}

/// Exact stem match first, else the first upload whose name starts with `stem`.
fn find_upload<'a>(uploads: &'a [String], stem: &str) -> Option<&'a String> {
    uploads
        .iter()
        .find(|name| Path::new(name).file_stem().and_then(|s| s.to_str()) == Some(stem))
        .or_else(|| uploads.iter().find(|name| name.starts_with(stem)))
}

/// Name of the link for `upload` in `images/`. Training pairs images and
/// labels by stem, so the link always takes the label's stem.
fn linked_image_name(stem: &str, upload: &str) -> String {
    match Path::new(upload).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem.to_string(),
    }
}

/// Sorted names of regular files (or links to them) directly inside `dir`.
async fn list_files(dir: &Path) -> Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await.with_path(dir)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.with_path(dir)? {
        if tokio::fs::metadata(entry.path())
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

async fn move_pair(root: &Path, pair: &Pair, subset: &str) -> Result<()> {
    let images = root.join(DatasetConfig::IMAGES_DIR);
    let labels = root.join(DatasetConfig::LABELS_DIR);

    let image_src = images.join(&pair.image);
    let image_dest = images.join(subset).join(&pair.image);
    if tokio::fs::symlink_metadata(&image_src).await.is_ok() {
        tokio::fs::rename(&image_src, &image_dest)
            .await
            .map_err(|e| TrainpipeError::io("moving image", &image_src, e))?;
    }

    let label_src = labels.join(&pair.label);
    let label_dest = labels.join(subset).join(&pair.label);
    if let Err(e) = tokio::fs::rename(&label_src, &label_dest).await {
        // Put the image back so a retry starts from a consistent state.
        let _ = tokio::fs::rename(&image_dest, &image_src).await;
        return Err(TrainpipeError::io("moving label", &label_src, e));
    }
    Ok(())
}

/// Write `data.yaml`. JSON is a subset of YAML, so any YAML loader reads it.
async fn write_manifest(root: &Path, classes: &[String]) -> Result<PathBuf> {
    let names: serde_json::Map<String, serde_json::Value> = classes
        .iter()
        .enumerate()
        .map(|(i, c)| (i.to_string(), serde_json::Value::String(c.clone())))
        .collect();

    let manifest = serde_json::json!({
        "names": names,
        "path": root.to_string_lossy(),
        "train": format!("{}/{}", DatasetConfig::IMAGES_DIR, DatasetConfig::TRAIN_DIR),
        "val": format!("{}/{}", DatasetConfig::IMAGES_DIR, DatasetConfig::VAL_DIR),
    });

    let path = root.join(DatasetConfig::MANIFEST_FILENAME);
    tokio::fs::write(&path, serde_json::to_vec_pretty(&manifest)?)
        .await
        .with_path(&path)?;
    Ok(path)
}
