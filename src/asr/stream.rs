//! Streaming recognizer client
//!
//! Holds the upstream WebSocket for one session: sends the config frame once,
//! forwards PCM frames as audio-chunk frames, and surfaces decoded transcript
//! events. Shuts down on upstream close, local cancellation or read error; in
//! every case the transcript channel closes and any error lands on the
//! single-slot error channel.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::asr::codec::{decode_response, FrameEncoder};
use crate::config::AsrConfig;
use crate::types::Transcript;

pub struct AsrStream {
    config: AsrConfig,
}

impl AsrStream {
    pub fn new(config: AsrConfig) -> Self {
        Self { config }
    }

    /// Pump `pcm_rx` into the recognizer and decoded transcripts into
    /// `transcript_tx` until either side closes or `cancel` fires. The
    /// receiver is borrowed so the caller can redial with the same audio
    /// stream after an upstream disconnect; `first_frame` is sent ahead of
    /// the channel (the frame that triggered the redial).
    pub async fn run(
        &self,
        cancel: CancellationToken,
        first_frame: Option<Vec<u8>>,
        pcm_rx: &mut mpsc::Receiver<Vec<u8>>,
        transcript_tx: mpsc::Sender<Transcript>,
        err_tx: mpsc::Sender<anyhow::Error>,
    ) {
        if let Err(e) = self.stream(cancel, first_frame, pcm_rx, transcript_tx).await {
            let _ = err_tx.try_send(e);
        }
    }

    async fn stream(
        &self,
        cancel: CancellationToken,
        first_frame: Option<Vec<u8>>,
        pcm_rx: &mut mpsc::Receiver<Vec<u8>>,
        transcript_tx: mpsc::Sender<Transcript>,
    ) -> Result<()> {
        let mut request = self
            .config
            .ws_url
            .as_str()
            .into_client_request()
            .context("bad recognizer URL")?;
        request.headers_mut().insert(
            AUTHORIZATION,
            format!("Bearer {}", self.config.api_key)
                .parse()
                .context("bad recognizer credentials")?,
        );

        let (ws, _) = connect_async(request)
            .await
            .context("recognizer dial failed")?;
        info!("Recognizer connected: {}", self.config.ws_url);

        let (mut sink, mut stream) = ws.split();
        let mut encoder = FrameEncoder::new();
        sink.send(Message::Binary(encoder.config_frame(&self.config.model)?.into()))
            .await
            .context("send config frame failed")?;
        if let Some(pcm) = first_frame {
            sink.send(Message::Binary(encoder.audio_frame(&pcm)?.into()))
                .await
                .context("send audio chunk failed")?;
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if let Some(t) = decode_response(&data) {
                            debug!("Transcript (final={}): \"{}\"", t.is_final, t.text);
                            if transcript_tx.send(t).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Recognizer closed the stream");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("recognizer read failed"),
                },
                chunk = pcm_rx.recv() => match chunk {
                    Some(pcm) => {
                        sink.send(Message::Binary(encoder.audio_frame(&pcm)?.into()))
                            .await
                            .context("send audio chunk failed")?;
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return Ok(());
                    }
                },
            }
        }
    }
}
