//! Running helper scripts and streaming their JSON progress lines.

use crate::cancel::CancellationToken;
use crate::{Result, TrainpipeError};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// One progress line printed by a helper script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptEvent {
    Epoch {
        epoch: u32,
        #[serde(default)]
        metrics: Map<String, Value>,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
    Done {
        #[serde(default)]
        path: Option<PathBuf>,
    },
}

/// What a script reported before exiting successfully.
#[derive(Debug, Clone, Default)]
pub struct ScriptOutcome {
    /// `path` of the last `done` event.
    pub output: Option<PathBuf>,
}

/// Run `python script args...`, forwarding every parsed event to `on_event`.
///
/// The child is killed when `cancel` fires. A non-zero exit becomes
/// `TrainpipeError::Other` carrying the script's last reported error, or the
/// tail of its stderr.
pub async fn run_script<F>(
    python: &Path,
    script: &Path,
    args: &[OsString],
    cancel: &CancellationToken,
    mut on_event: F,
) -> Result<ScriptOutcome>
where
    F: FnMut(&ScriptEvent) + Send,
{
    cancel.check()?;

    let script_name = script
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| script.display().to_string());

    let mut child = Command::new(python)
        .arg(script)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TrainpipeError::io(&format!("spawning {script_name}"), python, e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TrainpipeError::Other(format!("{script_name}: stdout not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| TrainpipeError::Other(format!("{script_name}: stderr not captured")))?;

    let stderr_name = script_name.clone();
    let stderr_task = tokio::spawn(async move {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("[{}] stderr: {}", stderr_name, line);
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail.into_iter().collect::<Vec<_>>().join("\n")
    });

    let mut outcome = ScriptOutcome::default();
    let mut last_error: Option<String> = None;
    let mut reader = BufReader::new(stdout).lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                child.kill().await.ok();
                return Err(TrainpipeError::Cancelled);
            }
            line = reader.next_line() => line,
        };

        match line {
            Ok(Some(line)) => match serde_json::from_str::<ScriptEvent>(&line) {
                Ok(event) => {
                    match &event {
                        ScriptEvent::Done { path } => outcome.output = path.clone(),
                        ScriptEvent::Error { message } => last_error = Some(message.clone()),
                        ScriptEvent::Log { message } => debug!("[{}] {}", script_name, message),
                        ScriptEvent::Epoch { .. } => {}
                    }
                    on_event(&event);
                }
                Err(_) => debug!("[{}] {}", script_name, line),
            },
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading {} stdout: {}", script_name, e);
                break;
            }
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            child.kill().await.ok();
            return Err(TrainpipeError::Cancelled);
        }
        status = child.wait() => status
            .map_err(|e| TrainpipeError::io(&format!("waiting for {script_name}"), script, e))?,
    };
    let stderr_tail = stderr_task.await.unwrap_or_default();

    if !status.success() {
        let detail = last_error.unwrap_or(stderr_tail);
        return Err(TrainpipeError::Other(format!(
            "{} exited with status {}: {}",
            script_name,
            status.code().unwrap_or(-1),
            detail.trim()
        )));
    }

    Ok(outcome)
}
