//! HTTP client for the NVR's latest-snapshot endpoint

use crate::infra::config::Config;
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Source of camera snapshots, abstracted for testing
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the most recent frame for a camera as raw JPEG bytes
    async fn latest_jpeg(&self, camera: &str) -> anyhow::Result<Bytes>;
}

pub struct NvrClient {
    base_url: String,
    client: reqwest::Client,
}

impl NvrClient {
    pub fn new(config: &Config) -> Self {
        // Client is created once for connection reuse across attempts
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.snapshot_timeout_ms()))
            .build()
            .unwrap_or_default();

        Self { base_url: config.nvr_base_url().trim_end_matches('/').to_string(), client }
    }
}

fn snapshot_url(base_url: &str, camera: &str) -> String {
    format!("{base_url}/api/{camera}/latest.jpg")
}

#[async_trait]
impl SnapshotSource for NvrClient {
    async fn latest_jpeg(&self, camera: &str) -> anyhow::Result<Bytes> {
        let url = snapshot_url(&self.base_url, camera);
        debug!(url = %url, "snapshot_fetch");

        let response = self
            .client
            .get(&url)
            .query(&[("quality", "100")])
            .send()
            .await
            .with_context(|| format!("Snapshot request failed for camera {camera}"))?;

        anyhow::ensure!(
            response.status().is_success(),
            "Snapshot fetch for camera {camera} returned status {}",
            response.status()
        );

        response
            .bytes()
            .await
            .with_context(|| format!("Failed reading snapshot body for camera {camera}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_url() {
        assert_eq!(
            snapshot_url("http://nvr.local:5000", "drive"),
            "http://nvr.local:5000/api/drive/latest.jpg"
        );
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = Config::default();
        let client = NvrClient::new(&config);
        assert!(!client.base_url.ends_with('/'));
    }
}
