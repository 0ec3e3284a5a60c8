//! One-shot recognition over HTTP
//!
//! The VAD-batch ingestion path records whole segments, uploads them, and
//! asks the recognizer to transcribe by URL.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::AsrConfig;

/// Anything that can turn an uploaded audio URL into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_url: &str) -> Result<String>;
}

pub struct BatchAsr {
    http: reqwest::Client,
    config: AsrConfig,
}

impl BatchAsr {
    pub fn new(config: AsrConfig) -> Self {
        Self { http: reqwest::Client::new(), config }
    }
}

#[derive(Debug, Deserialize)]
struct AsrResponse {
    data: AsrData,
}

#[derive(Debug, Deserialize)]
struct AsrData {
    result: AsrResult,
}

#[derive(Debug, Deserialize)]
struct AsrResult {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl Transcriber for BatchAsr {
    async fn transcribe(&self, audio_url: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "audio": { "format": "wav", "url": audio_url },
        });

        let response = self
            .http
            .post(&self.config.http_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .context("recognizer request failed")?;

        if !response.status().is_success() {
            bail!("recognizer returned non-200 status: {}", response.status());
        }

        let parsed: AsrResponse = response
            .json()
            .await
            .context("failed to decode recognizer response")?;
        Ok(parsed.data.result.text)
    }
}
