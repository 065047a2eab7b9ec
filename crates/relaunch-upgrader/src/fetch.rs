// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! HTTP access to the check and payload endpoints

use crate::error::{Result, UpgradeError};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

pub const USER_AGENT: &str = concat!("relaunch-upgrader/", env!("CARGO_PKG_VERSION"));

/// Narrow view of the network used by an update cycle
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url` with query parameters and return the body as text
    async fn get_text(&self, url: &str, query: &[(&str, &str)], timeout: Duration)
    -> Result<String>;

    /// GET `url` and stream the body to `dest`, returning the number of bytes written.
    /// A partial `dest` is removed on failure.
    async fn download(&self, url: &str, dest: &Path, timeout: Duration) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| UpgradeError::Fetch(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn stream_to_file(&self, url: &str, dest: &Path, timeout: Duration) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| UpgradeError::Fetch(format!("Request to {url} failed: {e}")))?;

        if response.status() != StatusCode::OK {
            return Err(UpgradeError::Fetch(format!(
                "Download failed with status: {}",
                response.status()
            )));
        }

        let expected = response.content_length();
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0_u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| UpgradeError::Fetch(format!("Transfer interrupted: {e}")))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        if let Some(expected) = expected
            && expected != written
        {
            return Err(UpgradeError::Fetch(format!(
                "Incomplete transfer: {written} of {expected} bytes"
            )));
        }

        Ok(written)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get_text(
        &self,
        url: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<String> {
        let response = self
            .client
            .get(url)
            .query(query)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| UpgradeError::Fetch(format!("Request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(UpgradeError::Fetch(format!(
                "Request to {url} failed with status: {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| UpgradeError::Fetch(format!("Failed to read response: {e}")))
    }

    async fn download(&self, url: &str, dest: &Path, timeout: Duration) -> Result<u64> {
        let result = self.stream_to_file(url, dest, timeout).await;
        if result.is_err()
            && dest.exists()
            && let Err(e) = tokio::fs::remove_file(dest).await
        {
            tracing::warn!("Failed to remove partial download {}: {e}", dest.display());
        }
        result
    }
}
