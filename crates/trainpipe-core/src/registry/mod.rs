//! Base model registry.
//!
//! Every directory under the models root that carries a `config.json`
//! manifest is an installable base model. Manifests are read fresh on every
//! call, so editing or removing files on disk is reflected immediately.
//! Installing fetches whatever a manifest declares and is not yet present.

mod manifest;

pub use manifest::{BaseModelEntry, DownloadSpec, InstallSelection, ModelManifest, ModelTask};

use crate::config::{PathsConfig, StoragePaths, TrainingConfig};
use crate::error::IoResultExt;
use crate::network::Downloader;
use crate::platform::create_link;
use crate::{Result, TrainpipeError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of [`BaseModelRegistry::install_many`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: Vec<String>,
    /// Requested names without a manifest.
    pub unknown: Vec<String>,
}

/// Discovers and installs base models.
#[derive(Debug, Clone)]
pub struct BaseModelRegistry {
    models_root: PathBuf,
    static_root: PathBuf,
    downloader: Downloader,
}

impl BaseModelRegistry {
    pub fn new(models_root: PathBuf, static_root: PathBuf, downloader: Downloader) -> Self {
        Self {
            models_root,
            static_root,
            downloader,
        }
    }

    pub fn from_paths(paths: &StoragePaths, downloader: Downloader) -> Self {
        Self::new(
            paths.models_root.clone(),
            paths.static_root.clone(),
            downloader,
        )
    }

    pub fn models_root(&self) -> &Path {
        &self.models_root
    }

    /// Root of the base models' static assets.
    pub fn static_root(&self) -> &Path {
        &self.static_root
    }

    /// All manifests, sorted by name, optionally restricted to one task.
    ///
    /// Directories without a manifest are skipped; unreadable manifests are
    /// logged and skipped.
    pub fn list(&self, task: Option<ModelTask>) -> Result<Vec<BaseModelEntry>> {
        let read_dir = match std::fs::read_dir(&self.models_root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TrainpipeError::io_with_path(e, &self.models_root)),
        };

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry.with_path(&self.models_root)?;
            if !dir_entry.path().is_dir() {
                continue;
            }
            let Some(name) = dir_entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            match self.entry(&name) {
                Ok(Some(entry)) => {
                    if task.map_or(true, |t| t == entry.task) {
                        entries.push(entry);
                    }
                }
                Ok(None) => debug!("Skipping {}: no manifest", name),
                Err(e) => warn!("Skipping base model {}: {}", name, e),
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Names of installed base models, optionally restricted to one task.
    pub fn installed_names(&self, task: Option<ModelTask>) -> Result<Vec<String>> {
        Ok(self
            .list(task)?
            .into_iter()
            .filter(|e| e.installed)
            .map(|e| e.name)
            .collect())
    }

    /// Load a single manifest with its computed install state.
    pub fn entry(&self, name: &str) -> Result<Option<BaseModelEntry>> {
        let Some(manifest) = self.load_manifest(name)? else {
            return Ok(None);
        };

        let installed = self.all_present(name, &manifest.downloads);
        Ok(Some(BaseModelEntry {
            name: name.to_string(),
            task: manifest.task,
            downloads: manifest.downloads,
            installed,
            extra: manifest.extra,
        }))
    }

    pub fn is_installed(&self, name: &str) -> Result<bool> {
        Ok(self.entry(name)?.is_some_and(|e| e.installed))
    }

    /// Local checkpoint a training run starts from.
    pub fn checkpoint_path(&self, name: &str) -> PathBuf {
        self.models_root
            .join(name)
            .join(TrainingConfig::BASE_CHECKPOINT_FILENAME)
    }

    /// Fetch every declared asset that is not yet on disk.
    ///
    /// Returns `Ok(false)` when no manifest exists for `name`. The first failed
    /// asset aborts the call; assets installed before it are kept.
    pub async fn install(&self, name: &str) -> Result<bool> {
        let Some(manifest) = self.load_manifest(name)? else {
            return Ok(false);
        };

        for spec in &manifest.downloads {
            self.install_asset(name, spec).await?;
        }

        info!("Base model {} installed", name);
        Ok(true)
    }

    /// Install a selection of base models, reporting unknown names.
    pub async fn install_many(&self, selection: &InstallSelection) -> Result<InstallReport> {
        let names: Vec<String> = match selection {
            InstallSelection::All => self.list(None)?.into_iter().map(|e| e.name).collect(),
            InstallSelection::Task(task) => {
                self.list(Some(*task))?.into_iter().map(|e| e.name).collect()
            }
            InstallSelection::Names(names) => names.clone(),
        };

        let mut report = InstallReport::default();
        for name in names {
            if self.install(&name).await? {
                report.installed.push(name);
            } else {
                warn!("Base model {} not found", name);
                report.unknown.push(name);
            }
        }
        Ok(report)
    }

    fn load_manifest(&self, name: &str) -> Result<Option<ModelManifest>> {
        if !is_plain_name(name) {
            return Ok(None);
        }

        let path = self
            .models_root
            .join(name)
            .join(PathsConfig::MANIFEST_FILENAME);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TrainpipeError::io_with_path(e, path)),
        };

        let manifest = serde_json::from_str(&content).map_err(|e| TrainpipeError::Json {
            message: format!("invalid manifest {}: {}", path.display(), e),
            source: Some(e),
        })?;
        Ok(Some(manifest))
    }

    fn all_present(&self, name: &str, downloads: &[DownloadSpec]) -> bool {
        downloads.iter().all(|spec| {
            spec.destination(&self.models_root, &self.static_root, name)
                .exists()
        })
    }

    async fn install_asset(&self, name: &str, spec: &DownloadSpec) -> Result<()> {
        if !is_plain_name(&spec.filename) {
            return Err(TrainpipeError::Config {
                message: format!(
                    "download filename {:?} of {} is not a plain name",
                    spec.filename, name
                ),
            });
        }
        let destination = spec.destination(&self.models_root, &self.static_root, name);
        if destination.exists() {
            debug!("{} already present", destination.display());
            return Ok(());
        }

        // A dangling link left behind by a removed source blocks re-linking.
        if std::fs::symlink_metadata(&destination).is_ok() {
            std::fs::remove_file(&destination).with_path(&destination)?;
        }

        let source = spec.model_dir_path(&self.models_root, name);
        if spec.is_remote() && !source.exists() {
            let url = spec.source_url()?.ok_or_else(|| TrainpipeError::Config {
                message: format!(
                    "download {} of {} has neither a url nor the local flag",
                    spec.filename, name
                ),
            })?;
            info!("Fetching {} for {} from {}", spec.filename, name, url);
            self.downloader.download_with_retry(url.as_str(), &source).await?;
        }

        if !source.exists() {
            return Err(TrainpipeError::io(
                "local asset missing",
                &source,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }

        if spec.is_static {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent).with_path(parent)?;
            }
            create_link(&source, &destination)?;
        }
        Ok(())
    }
}

/// A single path component that cannot escape the models root.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
}
