//! VAD segmentation with record, upload and batch transcription
//!
//! The alternate ingestion path: the client streams continuous audio and the
//! server cuts utterances itself. A segment opens on the first voiced frame,
//! keeps trailing silence for naturalness, and is cut after one second of
//! quiet. Cut segments are wrapped as WAV, uploaded, transcribed by URL, and
//! the text is published to the orchestrator.
//!
//! While a segment is being transcribed or answered, incoming frames are
//! discarded so the bot never hears itself.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::asr::Transcriber;
use crate::audio::{wav, BYTES_PER_FRAME};
use crate::storage::ObjectStore;
use crate::vad::VoiceDetector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    Idle,
    Listening,
    Processing,
    Responding,
}

/// A transcribed utterance segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentResult {
    pub seg_id: u32,
    pub text: String,
    pub file_url: String,
}

/// Called on every state transition
pub type StateCallback = Box<dyn Fn(SegmenterState) + Send + Sync>;

struct Shared {
    state: Mutex<SegmenterState>,
    vad_active: AtomicBool,
    on_state_change: Mutex<Option<StateCallback>>,
}

impl Shared {
    fn set_state(&self, next: SegmenterState) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == next {
                return;
            }
            *state = next;
        }
        let cb = self.on_state_change.lock().unwrap();
        if let Some(cb) = cb.as_ref() {
            // a broken callback must not take the audio loop down
            if std::panic::catch_unwind(AssertUnwindSafe(|| cb(next))).is_err() {
                warn!("State-change callback panicked; continuing");
            }
        }
    }

    fn state(&self) -> SegmenterState {
        *self.state.lock().unwrap()
    }
}

/// Cloneable view of the segmenter for the orchestrator and transport
#[derive(Clone)]
pub struct SegmenterHandle {
    shared: Arc<Shared>,
}

impl SegmenterHandle {
    /// Whether the detector currently hears voice
    pub fn is_voice_active(&self) -> bool {
        self.shared.vad_active.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SegmenterState {
        self.shared.state()
    }

    /// The reply for the last segment finished; accept audio again
    pub fn on_response_done(&self) {
        self.shared.set_state(SegmenterState::Idle);
    }
}

pub struct Segmenter {
    detector: VoiceDetector,
    shared: Arc<Shared>,
    current: Vec<u8>,
    silence_count: u32,
    silence_cut: u32,
    seg_id: u32,
    store: Arc<dyn ObjectStore>,
    transcriber: Arc<dyn Transcriber>,
    result_tx: mpsc::Sender<SegmentResult>,
    tasks: JoinSet<()>,
}

impl Segmenter {
    pub fn new(
        aggressiveness: u8,
        silence_cut: u32,
        store: Arc<dyn ObjectStore>,
        transcriber: Arc<dyn Transcriber>,
        result_tx: mpsc::Sender<SegmentResult>,
    ) -> Self {
        Self {
            detector: VoiceDetector::new(aggressiveness),
            shared: Arc::new(Shared {
                state: Mutex::new(SegmenterState::Idle),
                vad_active: AtomicBool::new(false),
                on_state_change: Mutex::new(None),
            }),
            current: Vec::new(),
            silence_count: 0,
            silence_cut,
            seg_id: 0,
            store,
            transcriber,
            result_tx,
            tasks: JoinSet::new(),
        }
    }

    pub fn handle(&self) -> SegmenterHandle {
        SegmenterHandle { shared: self.shared.clone() }
    }

    pub fn set_state_callback(&self, cb: StateCallback) {
        *self.shared.on_state_change.lock().unwrap() = Some(cb);
    }

    /// Consume frames until the channel closes or the session is cancelled,
    /// then flush the trailing segment and wait for in-flight batch tasks.
    pub async fn run(mut self, mut audio_rx: mpsc::Receiver<Vec<u8>>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                frame = audio_rx.recv() => match frame {
                    Some(frame) => self.handle_frame(&frame),
                    None => break,
                },
            }
        }

        if self.shared.state() == SegmenterState::Listening && !self.current.is_empty() {
            self.cut();
        }
        while self.tasks.join_next().await.is_some() {}
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        if frame.len() != BYTES_PER_FRAME {
            warn!("Invalid frame size: got {} bytes, want {}", frame.len(), BYTES_PER_FRAME);
            return;
        }

        // a segment is in flight or being answered: the mic is muted
        let state = self.shared.state();
        match state {
            SegmenterState::Processing | SegmenterState::Responding => return,
            SegmenterState::Idle | SegmenterState::Listening => {}
        }

        let active = self.detector.is_active(frame);
        self.shared.vad_active.store(active, Ordering::SeqCst);

        match state {
            SegmenterState::Idle => {
                if active {
                    debug!("Speech started, opening segment {}", self.seg_id);
                    self.shared.set_state(SegmenterState::Listening);
                    self.current.extend_from_slice(frame);
                    self.silence_count = 0;
                }
            }
            SegmenterState::Listening => {
                // keep trailing silence so the recording ends naturally
                self.current.extend_from_slice(frame);
                if active {
                    self.silence_count = 0;
                } else {
                    self.silence_count += 1;
                    if self.silence_count >= self.silence_cut {
                        self.cut();
                    }
                }
            }
            _ => unreachable!("frames are dropped in Processing/Responding"),
        }
    }

    fn cut(&mut self) {
        let pcm = std::mem::take(&mut self.current);
        let seg_id = self.seg_id;
        self.seg_id += 1;
        self.silence_count = 0;
        self.shared.vad_active.store(false, Ordering::SeqCst);
        self.shared.set_state(SegmenterState::Processing);
        info!("Cut segment {}: {} bytes", seg_id, pcm.len());

        let store = self.store.clone();
        let transcriber = self.transcriber.clone();
        let result_tx = self.result_tx.clone();
        let shared = self.shared.clone();
        self.tasks.spawn(async move {
            match handle_segment(seg_id, pcm, store, transcriber).await {
                Ok(result) => {
                    info!("Segment {} transcribed: \"{}\"", seg_id, result.text);
                    match result_tx.try_send(result) {
                        Ok(()) => shared.set_state(SegmenterState::Responding),
                        Err(_) => {
                            warn!("Segment {} result dropped: consumer is slow", seg_id);
                            shared.set_state(SegmenterState::Idle);
                        }
                    }
                }
                Err(e) => {
                    warn!("Segment {} discarded: {:#}", seg_id, e);
                    shared.set_state(SegmenterState::Idle);
                }
            }
        });
    }
}

/// Wrap, upload and transcribe one cut segment
async fn handle_segment(
    seg_id: u32,
    pcm: Vec<u8>,
    store: Arc<dyn ObjectStore>,
    transcriber: Arc<dyn Transcriber>,
) -> anyhow::Result<SegmentResult> {
    let wav_bytes = wav::wrap_pcm(&pcm);
    let name = format!("seg_{}.wav", seg_id);
    let key = store.put(&name, wav_bytes).await?;
    let file_url = store.url(&key);
    let text = transcriber.transcribe(&file_url).await?;
    Ok(SegmentResult { seg_id, text, file_url })
}
