//! Streaming synthesizer client
//!
//! Sends sentence-sized text units to the upstream synthesizer and emits
//! PCM chunks in strict sequence order. A negative sequence number from the
//! server ends the output stream.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::bytes_to_samples;
use crate::config::TtsConfig;
use crate::tts::reorder::ReorderBuffer;
use crate::types::PcmChunk;

#[derive(Debug, Deserialize)]
struct TtsResponse {
    #[serde(default)]
    sequence: i32,
    #[serde(default)]
    data: String,
    #[serde(default)]
    addition: Option<Addition>,
}

#[derive(Debug, Deserialize)]
struct Addition {
    #[serde(default)]
    duration: String,
}

#[derive(Clone)]
pub struct TtsClient {
    config: TtsConfig,
}

impl TtsClient {
    pub fn new(config: TtsConfig) -> Self {
        Self { config }
    }

    /// Connect and start synthesizing sentences from `sentence_rx`. Dial
    /// failures surface here; later errors land on the returned single-slot
    /// error channel. The PCM channel closes when synthesis ends.
    pub async fn stream(
        &self,
        cancel: CancellationToken,
        voice_type: &str,
        mut sentence_rx: mpsc::Receiver<String>,
    ) -> Result<(mpsc::Receiver<PcmChunk>, mpsc::Receiver<anyhow::Error>)> {
        let mut request = self
            .config
            .ws_url
            .as_str()
            .into_client_request()
            .context("bad synthesizer URL")?;
        request.headers_mut().insert(
            AUTHORIZATION,
            format!("Bearer {}", self.config.api_key)
                .parse()
                .context("bad synthesizer credentials")?,
        );
        request.headers_mut().insert(
            "VoiceType",
            voice_type.parse().context("bad voice type header")?,
        );

        let (ws, _) = connect_async(request)
            .await
            .context("synthesizer dial failed")?;
        info!("Synthesizer connected, voice {}", voice_type);

        let (mut sink, mut stream) = ws.split();
        let (pcm_tx, pcm_rx) = mpsc::channel(8);
        let (err_tx, err_rx) = mpsc::channel(1);

        // uplink: one request per sentence
        let voice = voice_type.to_string();
        let speed_ratio = self.config.speed_ratio;
        let err_tx_up = err_tx.clone();
        let cancel_up = cancel.clone();
        tokio::spawn(async move {
            loop {
                let sentence = tokio::select! {
                    () = cancel_up.cancelled() => break,
                    sentence = sentence_rx.recv() => match sentence {
                        Some(s) => s,
                        None => break,
                    },
                };
                let params = serde_json::json!({
                    "audio": {
                        "voice_type": voice,
                        "encoding": "pcm",
                        "speed_ratio": speed_ratio,
                    },
                    "request": { "text": sentence },
                });
                if let Err(e) = sink.send(Message::Binary(params.to_string().into_bytes().into())).await {
                    let _ = err_tx_up.try_send(anyhow::Error::new(e).context("send text unit failed"));
                    return;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        // downlink: decode, reorder, emit
        tokio::spawn(async move {
            let mut reorder = ReorderBuffer::new();
            loop {
                let msg = tokio::select! {
                    () = cancel.cancelled() => break,
                    msg = stream.next() => msg,
                };
                let data = match msg {
                    Some(Ok(Message::Binary(data))) => data.to_vec(),
                    Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = err_tx.try_send(anyhow::Error::new(e).context("synthesizer read failed"));
                        break;
                    }
                };

                let response: TtsResponse = match serde_json::from_slice(&data) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("Undecodable synthesizer response: {}", e);
                        continue;
                    }
                };

                if !response.data.is_empty() {
                    let raw = match BASE64.decode(&response.data) {
                        Ok(raw) => raw,
                        Err(e) => {
                            warn!("Bad base64 in synthesizer response: {}", e);
                            continue;
                        }
                    };
                    if let Some(addition) = &response.addition {
                        debug!(
                            "Synthesizer chunk seq={} ({} bytes, {} ms)",
                            response.sequence,
                            raw.len(),
                            addition.duration
                        );
                    }
                    for chunk in reorder.push(response.sequence, bytes_to_samples(&raw)) {
                        if pcm_tx.send(chunk).await.is_err() {
                            return;
                        }
                    }
                }

                // negative sequence ends the output stream
                if response.sequence < 0 {
                    debug!("Synthesizer end-of-stream sentinel");
                    break;
                }
            }
        });

        Ok((pcm_rx, err_rx))
    }
}
