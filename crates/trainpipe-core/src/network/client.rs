//! Thin reqwest wrapper with the trainpipe user agent and status classification.

use crate::config::NetworkConfig;
use crate::{Result, TrainpipeError};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

/// HTTP client used for base-model asset downloads.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(NetworkConfig::DOWNLOAD_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(NetworkConfig::REQUEST_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| TrainpipeError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        Ok(Self { client })
    }

    /// GET `url`, failing on non-success statuses.
    ///
    /// 408/429/5xx map to retryable `Network` errors, everything else to
    /// `DownloadFailed`.
    pub async fn get(&self, url: &str) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TrainpipeError::Network {
                message: format!("GET {} failed: {}", url, e),
                source: Some(e),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if Self::is_retryable_status(status) {
            Err(TrainpipeError::Network {
                message: format!("GET {} returned {}", url, status),
                source: None,
            })
        } else {
            Err(TrainpipeError::DownloadFailed {
                url: url.to_string(),
                message: format!("server returned {}", status),
            })
        }
    }

    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
    }
}
