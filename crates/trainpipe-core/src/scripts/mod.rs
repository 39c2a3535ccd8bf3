//! Python helper scripts and the virtual environment they run in.
//!
//! Scripts are stored as string constants and written to disk on first use
//! or when the embedded version changes (detected via hash comparison).

mod embedded;
mod runner;

pub use embedded::{
    COMPILE_BLOB_SCRIPT_NAME, CONVERT_UPLOAD_SCRIPT_NAME, EXPORT_ONNX_SCRIPT_NAME,
    REQUIREMENTS_NAME, TRAIN_SCRIPT_NAME,
};
pub use runner::{run_script, ScriptEvent, ScriptOutcome};

use crate::cancel::CancellationToken;
use crate::config::StoragePaths;
use crate::error::IoResultExt;
use crate::platform::{system_python, venv_python};
use crate::{Result, TrainpipeError};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Compute a short hash of a string for staleness checking.
fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..8])
}

/// Deployed helper scripts plus the interpreter that runs them.
#[derive(Debug, Clone)]
pub struct ScriptEnvironment {
    scripts_dir: PathBuf,
    venv_dir: PathBuf,
    interpreter: Option<PathBuf>,
}

impl ScriptEnvironment {
    pub fn new(scripts_dir: PathBuf, venv_dir: PathBuf) -> Self {
        Self {
            scripts_dir,
            venv_dir,
            interpreter: None,
        }
    }

    pub fn from_paths(paths: &StoragePaths) -> Self {
        Self::new(paths.scripts_dir.clone(), paths.venv_dir.clone())
    }

    /// Run scripts with `interpreter` instead of the venv's Python.
    pub fn with_interpreter(mut self, interpreter: PathBuf) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    pub fn python(&self) -> PathBuf {
        self.interpreter
            .clone()
            .unwrap_or_else(|| venv_python(&self.venv_dir))
    }

    pub fn script_path(&self, name: &str) -> PathBuf {
        self.scripts_dir.join(name)
    }

    /// Whether the interpreter exists.
    pub fn is_ready(&self) -> bool {
        self.python().exists()
    }

    /// Deploy embedded scripts to disk if missing or outdated.
    ///
    /// Uses a `.hash` sidecar file to detect when the embedded script has
    /// changed and needs to be rewritten.
    pub fn ensure_scripts_deployed(&self) -> Result<()> {
        std::fs::create_dir_all(&self.scripts_dir).with_path(&self.scripts_dir)?;
        for (name, content) in embedded::DEPLOYED_FILES {
            deploy_script(&self.scripts_dir, name, content)?;
        }
        debug!("Scripts deployed to {}", self.scripts_dir.display());
        Ok(())
    }

    /// Create the virtual environment and install requirements if needed.
    pub async fn ensure_environment(&self) -> Result<()> {
        self.ensure_scripts_deployed()?;

        let python_path = self.python();
        if python_path.exists() {
            debug!("Venv already exists at {}", self.venv_dir.display());
            return Ok(());
        }

        info!("Creating virtual environment at {}", self.venv_dir.display());
        let output = Command::new(system_python())
            .arg("-m")
            .arg("venv")
            .arg(&self.venv_dir)
            .output()
            .await
            .map_err(|e| TrainpipeError::io("creating venv", &self.venv_dir, e))?;

        if !output.status.success() {
            return Err(TrainpipeError::Config {
                message: format!(
                    "Failed to create Python venv. Ensure {} is installed. Error: {}",
                    system_python(),
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        let output = Command::new(&python_path)
            .args(["-m", "pip", "install", "--upgrade", "pip"])
            .output()
            .await
            .map_err(|e| TrainpipeError::io("upgrading pip", &python_path, e))?;
        if !output.status.success() {
            warn!(
                "pip upgrade failed (non-fatal): {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let requirements = self.script_path(REQUIREMENTS_NAME);
        info!("Installing training dependencies...");
        let output = Command::new(&python_path)
            .args(["-m", "pip", "install", "-r"])
            .arg(&requirements)
            .output()
            .await
            .map_err(|e| TrainpipeError::io("installing requirements", &requirements, e))?;

        if !output.status.success() {
            return Err(TrainpipeError::Config {
                message: format!(
                    "Failed to install training dependencies: {}",
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        info!("Training environment ready");
        Ok(())
    }

    /// Run a deployed script by name.
    pub async fn run<F>(
        &self,
        script: &str,
        args: &[OsString],
        cancel: &CancellationToken,
        on_event: F,
    ) -> Result<ScriptOutcome>
    where
        F: FnMut(&ScriptEvent) + Send,
    {
        let python = self.python();
        if !python.exists() {
            return Err(TrainpipeError::Config {
                message: format!(
                    "Python environment not set up at {}; run `trainpipe setup-env`",
                    python.display()
                ),
            });
        }
        self.ensure_scripts_deployed()?;
        run_script(&python, &self.script_path(script), args, cancel, on_event).await
    }
}

fn deploy_script(dir: &Path, filename: &str, content: &str) -> Result<()> {
    let script_path = dir.join(filename);
    let hash_path = dir.join(format!("{}.hash", filename));
    let current_hash = content_hash(content);

    if script_path.exists() {
        if let Ok(stored_hash) = std::fs::read_to_string(&hash_path) {
            if stored_hash.trim() == current_hash {
                return Ok(());
            }
        }
    }

    std::fs::write(&script_path, content).with_path(&script_path)?;
    std::fs::write(&hash_path, &current_hash).with_path(&hash_path)?;
    Ok(())
}
