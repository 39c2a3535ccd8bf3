//! Atomic file downloads: stream into `<dest>.part`, then rename.

use crate::config::NetworkConfig;
use crate::error::IoResultExt;
use crate::network::client::HttpClient;
use crate::retry::{retry_async, RetryPolicy};
use crate::{Result, TrainpipeError};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Downloads remote assets to their final location without ever exposing a
/// partially written file at that location.
#[derive(Debug, Clone)]
pub struct Downloader {
    http: HttpClient,
    retry: RetryPolicy,
}

impl Downloader {
    pub fn new() -> Result<Self> {
        Ok(Self::with_client(HttpClient::new()?))
    }

    pub fn with_client(http: HttpClient) -> Self {
        Self {
            http,
            retry: RetryPolicy::new()
                .with_max_attempts(NetworkConfig::MAX_RETRIES)
                .with_base_delay(NetworkConfig::DOWNLOAD_RETRY_BASE_DELAY),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Download `url` to `destination`, returning the number of bytes written.
    pub async fn download(&self, url: &str, destination: &Path) -> Result<u64> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.with_path(parent)?;
        }

        let temp_path = temp_path_for(destination);
        match self.fetch_into(url, &temp_path).await {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::rename(&temp_path, destination).await {
                    let _ = tokio::fs::remove_file(&temp_path).await;
                    return Err(TrainpipeError::io(
                        "moving download into place",
                        destination,
                        e,
                    ));
                }
                info!("Downloaded {} bytes to {}", bytes, destination.display());
                Ok(bytes)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                Err(e)
            }
        }
    }

    /// [`download`](Self::download) with exponential backoff on transient failures.
    pub async fn download_with_retry(&self, url: &str, destination: &Path) -> Result<u64> {
        let (result, report) = retry_async(
            &self.retry,
            || self.download(url, destination),
            TrainpipeError::is_retryable,
        )
        .await;

        if report.attempts > 1 {
            debug!(
                "Download of {} finished after {} attempts (waited {:?})",
                url, report.attempts, report.total_delay
            );
        }
        result
    }

    async fn fetch_into(&self, url: &str, temp_path: &Path) -> Result<u64> {
        let response = self.http.get(url).await?;
        let mut file = tokio::fs::File::create(temp_path)
            .await
            .with_path(temp_path)?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TrainpipeError::Network {
                message: format!("Error reading download stream: {}", e),
                source: Some(e),
            })?;
            file.write_all(&chunk).await.with_path(temp_path)?;
            written += chunk.len() as u64;
        }

        file.flush().await.with_path(temp_path)?;
        file.sync_all().await.with_path(temp_path)?;
        Ok(written)
    }
}

fn temp_path_for(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(NetworkConfig::DOWNLOAD_TEMP_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_temp_path_suffix() {
        assert_eq!(
            temp_path_for(Path::new("/m/yolov8n/model.pt")),
            PathBuf::from("/m/yolov8n/model.pt.part")
        );
    }

    #[tokio::test]
    async fn test_failed_download_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("sub").join("model.pt");
        let downloader = Downloader::new().unwrap();

        // Nothing listens on port 1.
        let result = downloader.download("http://127.0.0.1:1/model.pt", &dest).await;

        assert!(result.is_err());
        assert!(!dest.exists());
        assert!(!temp_path_for(&dest).exists());
    }
}
