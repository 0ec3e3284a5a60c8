//! Per-session orchestration
//!
//! One `Session` per client connection. It owns the state machine, wires the
//! chosen ingestion path (streaming recognizer or VAD-batch), and runs the
//! reply pipeline (chat tokens merged into sentences, synthesized, pumped
//! back to the client) under a per-response cancellation scope so a barge-in
//! aborts everything downstream without leaking tasks.
//!
//! At most one response is live at a time; a new final transcript while one
//! is speaking is an implicit interrupt.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::asr::{AsrStream, Finalizer};
use crate::audio::samples_to_bytes;
use crate::config::Config;
use crate::llm::{LlmClient, SentenceMerger, VOICE_ONLY_DIRECTIVE};
use crate::roles::{HistoryStore, RoleDirectory};
use crate::server::messages::ControlMessage;
use crate::storage::ObjectStore;
use crate::tts::TtsClient;
use crate::types::{ChatMessage, PcmChunk};
use crate::vad::{Segmenter, SegmenterHandle, SegmenterState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Processing,
    Responding,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Processing => "processing",
            SessionState::Responding => "responding",
        }
    }
}

impl From<SegmenterState> for SessionState {
    fn from(s: SegmenterState) -> Self {
        match s {
            SegmenterState::Idle => SessionState::Idle,
            SegmenterState::Listening => SessionState::Listening,
            SegmenterState::Processing => SessionState::Processing,
            SegmenterState::Responding => SessionState::Responding,
        }
    }
}

/// One frame to the client: a control message or raw PCM for playback
#[derive(Debug)]
pub enum OutboundFrame {
    Control(ControlMessage),
    Audio(Vec<u8>),
}

/// Collaborators the session drives
#[derive(Clone)]
pub struct SessionDeps {
    pub llm: LlmClient,
    pub tts: TtsClient,
    pub roles: Arc<dyn RoleDirectory>,
    pub history: Arc<dyn HistoryStore>,
    pub store: Arc<dyn ObjectStore>,
    pub transcriber: Arc<dyn crate::asr::Transcriber>,
}

pub struct Session {
    user_id: String,
    role_id: i64,
    deps: SessionDeps,
    config: Arc<Config>,
    /// Connection scope; cancelling it tears every session task down
    cancel: CancellationToken,
    /// Live response scope, if any, with its generation number
    resp: Mutex<Option<(u64, CancellationToken)>>,
    resp_gen: AtomicU64,
    state: Mutex<SessionState>,
    outbound: mpsc::Sender<OutboundFrame>,
    segmenter: Mutex<Option<SegmenterHandle>>,
    /// Utterance counter on the streaming path
    utterance: AtomicU32,
}

impl Session {
    pub fn new(
        user_id: String,
        role_id: i64,
        deps: SessionDeps,
        config: Arc<Config>,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Arc<Self> {
        Arc::new(Self {
            user_id,
            role_id,
            deps,
            config,
            cancel: CancellationToken::new(),
            resp: Mutex::new(None),
            resp_gen: AtomicU64::new(0),
            state: Mutex::new(SessionState::Idle),
            outbound,
            segmenter: Mutex::new(None),
            utterance: AtomicU32::new(0),
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Disconnect: cancel everything this session spawned
    pub fn shutdown(&self) {
        if let Some((_, resp)) = self.resp.lock().unwrap().take() {
            resp.cancel();
        }
        self.cancel.cancel();
    }

    async fn send(&self, frame: OutboundFrame) -> bool {
        if self.outbound.send(frame).await.is_err() {
            // the writer is gone, which means the client is gone
            self.cancel.cancel();
            false
        } else {
            true
        }
    }

    pub async fn send_control(&self, msg: ControlMessage) -> bool {
        self.send(OutboundFrame::Control(msg)).await
    }

    async fn set_state(&self, next: SessionState, seg_id: Option<u32>) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == next {
                return;
            }
            *state = next;
        }
        let is_vad = self
            .segmenter
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| h.is_voice_active())
            .unwrap_or(false);
        self.send_control(ControlMessage::State {
            state: next.as_str().to_string(),
            is_vad,
            seg_id,
        })
        .await;
    }

    // ─── Ingestion: streaming recognizer ─────────────────────────

    /// Wire the streaming path: client audio → recognizer → finalizer →
    /// response per final transcript.
    pub fn start_streaming(self: &Arc<Self>, audio_rx: mpsc::Receiver<Vec<u8>>) {
        let cancel = self.cancel.clone();
        let (raw_tx, raw_rx) = mpsc::channel(32);
        let (final_tx, mut final_rx) = mpsc::channel(32);

        // recognizer supervisor: an upstream disconnect only costs the
        // current utterance; the connection is redialed when speech resumes
        let asr = AsrStream::new(self.config.asr.clone());
        let asr_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut audio_rx = audio_rx;
            loop {
                let first = tokio::select! {
                    () = asr_cancel.cancelled() => break,
                    frame = audio_rx.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                };
                let (err_tx, mut err_rx) = mpsc::channel(1);
                asr.run(asr_cancel.clone(), Some(first), &mut audio_rx, raw_tx.clone(), err_tx)
                    .await;
                if let Ok(e) = err_rx.try_recv() {
                    warn!("Recognizer connection lost: {:#}; redialing on next audio", e);
                    tokio::select! {
                        () = asr_cancel.cancelled() => break,
                        () = tokio::time::sleep(Duration::from_millis(500)) => {}
                    }
                }
            }
        });

        let debounce = Duration::from_millis(self.config.pipeline.debounce_ms);
        tokio::spawn(Finalizer::new(debounce).run(raw_rx, final_tx, cancel.clone()));

        let session = self.clone();
        tokio::spawn(async move {
            loop {
                let transcript = tokio::select! {
                    () = cancel.cancelled() => break,
                    t = final_rx.recv() => match t {
                        Some(t) => t,
                        None => break,
                    },
                };
                if transcript.is_final {
                    let seg_id = session.utterance.fetch_add(1, Ordering::SeqCst);
                    session.handle_final(transcript.text, seg_id, None).await;
                } else {
                    if session.state() == SessionState::Idle {
                        session.set_state(SessionState::Listening, None).await;
                    }
                    let seg_id = session.utterance.load(Ordering::SeqCst);
                    session
                        .send_control(ControlMessage::AsrResult {
                            text: transcript.text,
                            seg_id,
                            file_url: None,
                        })
                        .await;
                }
            }
        });
    }

    // ─── Ingestion: VAD segmentation + batch recognition ─────────

    /// Wire the alternate path: server-side VAD cuts segments which are
    /// uploaded and batch-transcribed; each transcription starts a response.
    pub fn start_vad(self: &Arc<Self>, audio_rx: mpsc::Receiver<Vec<u8>>) {
        let cancel = self.cancel.clone();
        let (result_tx, mut result_rx) = mpsc::channel(4);
        let segmenter = Segmenter::new(
            self.config.pipeline.vad_aggressiveness,
            self.config.pipeline.silence_cut_frames,
            self.deps.store.clone(),
            self.deps.transcriber.clone(),
            result_tx,
        );
        *self.segmenter.lock().unwrap() = Some(segmenter.handle());

        // surface segmenter transitions as state messages
        let (state_tx, mut state_rx) = mpsc::channel::<SegmenterState>(16);
        segmenter.set_state_callback(Box::new(move |s| {
            let _ = state_tx.try_send(s);
        }));
        let session = self.clone();
        let state_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = state_cancel.cancelled() => break,
                    s = state_rx.recv() => match s {
                        Some(s) => session.set_state(s.into(), None).await,
                        None => break,
                    },
                }
            }
        });

        tokio::spawn(segmenter.run(audio_rx, cancel.clone()));

        let session = self.clone();
        tokio::spawn(async move {
            loop {
                let result = tokio::select! {
                    () = cancel.cancelled() => break,
                    r = result_rx.recv() => match r {
                        Some(r) => r,
                        None => break,
                    },
                };
                session
                    .handle_final(result.text, result.seg_id, Some(result.file_url))
                    .await;
            }
        });
    }

    // ─── Interruption ────────────────────────────────────────────

    /// Barge-in: abort the in-flight reply, if any, and acknowledge.
    pub async fn interrupt(&self) {
        let taken = self.resp.lock().unwrap().take();
        if let Some((_, resp)) = taken {
            info!("Barge-in: cancelling in-flight response");
            resp.cancel();
        }
        self.send_control(ControlMessage::Intrupt { ack: true }).await;
    }

    // ─── Response pipeline ───────────────────────────────────────

    /// A final transcript arrived: cancel any live reply and start a new one.
    pub async fn handle_final(self: &Arc<Self>, text: String, seg_id: u32, file_url: Option<String>) {
        if text.trim().is_empty() {
            info!("Empty transcription for segment {}, skipping response", seg_id);
            self.finish_response().await;
            return;
        }

        // a final while responding is an implicit interrupt
        let prev = self.resp.lock().unwrap().take();
        if let Some((_, prev)) = prev {
            debug!("New final transcript pre-empts live response");
            prev.cancel();
        }

        let generation = self.resp_gen.fetch_add(1, Ordering::SeqCst) + 1;
        let resp = self.cancel.child_token();
        *self.resp.lock().unwrap() = Some((generation, resp.clone()));

        let session = self.clone();
        tokio::spawn(async move {
            session.run_response(resp, text, seg_id, file_url).await;
            // release the handle unless a newer response already owns it
            let mut guard = session.resp.lock().unwrap();
            if matches!(guard.as_ref(), Some((g, _)) if *g == generation) {
                *guard = None;
            }
        });
    }

    async fn run_response(
        self: &Arc<Self>,
        resp: CancellationToken,
        text: String,
        seg_id: u32,
        file_url: Option<String>,
    ) {
        self.set_state(SessionState::Processing, Some(seg_id)).await;
        self.send_control(ControlMessage::AsrResult { text: text.clone(), seg_id, file_url })
            .await;

        match self.setup_pipeline(&resp, &text).await {
            Ok((pcm_rx, tts_err_rx)) => {
                self.set_state(SessionState::Responding, Some(seg_id)).await;
                self.send_control(ControlMessage::TtsStart {}).await;
                self.pump_audio(&resp, pcm_rx, tts_err_rx).await;
                // exactly one end per start, interrupted or not
                self.send_control(ControlMessage::TtsEnd {}).await;
            }
            Err(e) => {
                error!("Response setup failed: {:#}", e);
                self.send_control(ControlMessage::Error { error: format!("{e:#}") })
                    .await;
            }
        }

        // stop any producers still running and go quiet
        resp.cancel();
        self.finish_response().await;
    }

    /// LLM tokens → sentence merger → synthesizer, all under `resp`
    async fn setup_pipeline(
        &self,
        resp: &CancellationToken,
        text: &str,
    ) -> Result<(mpsc::Receiver<PcmChunk>, mpsc::Receiver<anyhow::Error>)> {
        let role = self
            .deps
            .roles
            .lookup(self.role_id)
            .await
            .context("role lookup failed")?;

        let mut messages = vec![
            ChatMessage::system(role.prompt.clone()),
            ChatMessage::system(VOICE_ONLY_DIRECTIVE),
        ];
        match self.deps.history.history(&self.user_id, self.role_id).await {
            Ok(turns) => messages.extend(turns),
            Err(e) => warn!("History unavailable, replying without it: {:#}", e),
        }
        messages.push(ChatMessage::user(text));

        let token_rx = self
            .deps
            .llm
            .chat(resp.clone(), messages)
            .await
            .context("chat setup failed")?;

        let (sentence_tx, sentence_rx) = mpsc::channel(8);
        let merger_cancel = resp.clone();
        tokio::spawn(async move {
            SentenceMerger::new().run(token_rx, sentence_tx, merger_cancel).await;
        });

        let voice = if role.voice.is_empty() {
            self.config.tts.voice_type.clone()
        } else {
            role.voice
        };
        self.deps
            .tts
            .stream(resp.clone(), &voice, sentence_rx)
            .await
            .context("synthesis setup failed")
    }

    /// Forward ordered PCM to the client until the stream ends, the
    /// synthesizer errors, the write side fails, or the response is cancelled
    async fn pump_audio(
        &self,
        resp: &CancellationToken,
        mut pcm_rx: mpsc::Receiver<PcmChunk>,
        mut tts_err_rx: mpsc::Receiver<anyhow::Error>,
    ) {
        // chunk numbering passes through from the reorder buffer: strictly
        // ascending from 0, no gaps
        let mut sent: usize = 0;
        let mut err_open = true;
        loop {
            tokio::select! {
                () = resp.cancelled() => {
                    debug!("Response cancelled after {} chunks", sent);
                    return;
                }
                err = tts_err_rx.recv(), if err_open => match err {
                    Some(e) => {
                        warn!("Synthesizer failed mid-response: {:#}", e);
                        return;
                    }
                    None => err_open = false,
                },
                chunk = pcm_rx.recv() => match chunk {
                    Some(chunk) => {
                        sent += 1;
                        let bytes = samples_to_bytes(&chunk.samples);
                        let payload = BASE64.encode(&bytes);
                        if !self
                            .send_control(ControlMessage::TtsChunk {
                                seq: chunk.seq as u32,
                                pcm: payload,
                                text: None,
                            })
                            .await
                        {
                            return;
                        }
                        if !self.send(OutboundFrame::Audio(bytes)).await {
                            return;
                        }
                    }
                    None => {
                        debug!("Synthesis complete after {} chunks", sent);
                        return;
                    }
                },
            }
        }
    }

    /// Shared tail: release the segmenter mute and report Idle
    async fn finish_response(&self) {
        let handle = self.segmenter.lock().unwrap().clone();
        if let Some(handle) = handle {
            handle.on_response_done();
        }
        self.set_state(SessionState::Idle, None).await;
    }
}
