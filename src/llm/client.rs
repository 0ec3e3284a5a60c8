//! Streaming chat completion client
//!
//! Talks to an OpenAI-compatible `/chat/completions` endpoint with
//! `stream: true` and forwards delta tokens on a channel. Cancelling the
//! response scope drops the byte stream, which aborts the request.

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::types::ChatMessage;

/// Fixed system prompt keeping replies speakable; synthesized audio reads
/// the text verbatim.
pub const VOICE_ONLY_DIRECTIVE: &str = "You are speaking with the user over a live voice call. \
Reply only with short, natural spoken sentences. Do not use markdown, lists, code blocks, \
stage directions, bracketed asides, or quoted punctuation; every character you produce is \
synthesized and read aloud exactly as written.";

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self { http: reqwest::Client::new(), config }
    }

    /// Start a streaming completion. Setup failures surface here; once the
    /// stream is up, tokens arrive on the returned channel until the model
    /// finishes or `cancel` fires.
    pub async fn chat(
        &self,
        cancel: CancellationToken,
        messages: Vec<ChatMessage>,
    ) -> Result<mpsc::Receiver<String>> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            stream: true,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send streaming request to LLM provider")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("LLM streaming API error ({}): {}", status, body);
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            'read: loop {
                let chunk = tokio::select! {
                    () = cancel.cancelled() => break 'read,
                    chunk = stream.next() => chunk,
                };
                let chunk = match chunk {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        warn!("LLM stream read error: {}", e);
                        break 'read;
                    }
                    None => break 'read,
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // parse complete SSE events
                while let Some(pos) = buffer.find("\n\n") {
                    let event = buffer[..pos].to_string();
                    buffer = buffer[pos + 2..].to_string();

                    for line in event.lines() {
                        let Some(data) = line.strip_prefix("data: ") else { continue };
                        if data == "[DONE]" {
                            break 'read;
                        }
                        if let Ok(resp) = serde_json::from_str::<StreamResponse>(data) {
                            if let Some(content) =
                                resp.choices.first().and_then(|c| c.delta.content.as_deref())
                            {
                                if !content.is_empty() && tx.send(content.to_string()).await.is_err() {
                                    break 'read;
                                }
                            }
                        }
                    }
                }
            }
            debug!("LLM token stream ended");
        });

        Ok(rx)
    }
}
