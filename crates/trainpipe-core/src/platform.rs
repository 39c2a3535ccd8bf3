//! Platform abstraction for links, venv layout and accelerator detection.
//!
//! All `#[cfg]` blocks for OS-specific behavior live here.

use crate::{Result, TrainpipeError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Create a filesystem link at `dest` pointing to `src`.
///
/// Symlinks are preferred; on Windows a hard link is attempted when symlink
/// creation is not permitted. File contents are never copied.
pub fn create_link(src: &Path, dest: &Path) -> Result<()> {
    #[cfg(unix)]
    let result = std::os::unix::fs::symlink(src, dest);

    #[cfg(windows)]
    let result = std::os::windows::fs::symlink_file(src, dest)
        .or_else(|_| std::fs::hard_link(src, dest));

    #[cfg(not(any(unix, windows)))]
    let result = std::fs::hard_link(src, dest);

    result.map_err(|e| TrainpipeError::LinkFailed {
        src: src.to_path_buf(),
        dest: dest.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Path to the Python interpreter inside a virtual environment.
///
/// # Platform Behavior
/// - **Linux/macOS**: `{venv}/bin/python`
/// - **Windows**: `{venv}/Scripts/python.exe`
pub fn venv_python(venv_dir: &Path) -> PathBuf {
    #[cfg(windows)]
    {
        venv_dir.join("Scripts").join("python.exe")
    }
    #[cfg(not(windows))]
    {
        venv_dir.join("bin").join("python")
    }
}

/// Name of the interpreter used to bootstrap a virtual environment.
pub fn system_python() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}

/// Run blocking filesystem or database work on tokio's blocking pool.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TrainpipeError::Other(format!("Blocking task failed: {}", e)))?
}

/// Compute device handed to the training framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Mps,
    Cpu,
}

impl Device {
    /// Pick the best available device: CUDA, then Apple MPS, then CPU.
    pub fn detect() -> Self {
        if nvidia_smi_available() {
            Device::Cuda
        } else if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
            Device::Mps
        } else {
            Device::Cpu
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Mps => "mps",
            Device::Cpu => "cpu",
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn nvidia_smi_available() -> bool {
    let available = Command::new("nvidia-smi")
        .arg("--list-gpus")
        .output()
        .map(|o| o.status.success() && !o.stdout.is_empty())
        .unwrap_or(false);

    if !available {
        debug!("nvidia-smi not available - CUDA disabled");
    }
    available
}
