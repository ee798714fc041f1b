//! Opaque plate-recognition interface and its REST adapter
//!
//! Recognition is an external collaborator: image bytes in, optional plate
//! reading out. The adapter is constructed once at startup and shared
//! read-only across worker tasks.

use crate::infra::config::Config;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// A recognized plate with the recognizer's own confidence
#[derive(Debug, Clone, PartialEq)]
pub struct PlateReading {
    pub plate: String,
    pub confidence: f64,
}

/// Recognition function: image bytes -> optional plate reading
///
/// Returning `Ok(None)` means "no plate in this frame" and is a normal
/// outcome, not an error.
#[async_trait]
pub trait PlateRecognizer: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> anyhow::Result<Option<PlateReading>>;
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    plate: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

impl RecognizeResponse {
    fn into_reading(self) -> Option<PlateReading> {
        let plate = self.plate?;
        if plate.is_empty() {
            return None;
        }
        Some(PlateReading { plate, confidence: self.confidence.unwrap_or(0.0) })
    }
}

/// Adapter for an HTTP recognizer service (ALPR engines expose this shape)
pub struct RestRecognizer {
    endpoint: String,
    client: reqwest::Client,
}

impl RestRecognizer {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.recognizer_timeout_ms()))
            .build()
            .unwrap_or_default();

        Self { endpoint: config.recognizer_endpoint().to_string(), client }
    }
}

#[async_trait]
impl PlateRecognizer for RestRecognizer {
    async fn recognize(&self, image: &[u8]) -> anyhow::Result<Option<PlateReading>> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "image/jpeg")
            .body(image.to_vec())
            .send()
            .await
            .context("Recognizer request failed")?;

        anyhow::ensure!(
            response.status().is_success(),
            "Recognizer returned status {}",
            response.status()
        );

        let parsed: RecognizeResponse =
            response.json().await.context("Recognizer returned invalid JSON")?;
        let reading = parsed.into_reading();
        debug!(reading = ?reading, "recognition_result");
        Ok(reading)
    }
}
