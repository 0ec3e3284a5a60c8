//! Debounced finalization of partial transcripts
//!
//! The upstream recognizer does not always flag the end of an utterance. The
//! finalizer watches the partial stream and promotes the latest partial to a
//! final after a quiet interval, deduplicating both partials and finals.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::Transcript;

pub struct Finalizer {
    debounce: Duration,
    pending: String,
    last_partial: String,
    last_final: String,
}

impl Finalizer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: String::new(),
            last_partial: String::new(),
            last_final: String::new(),
        }
    }

    /// A partial arrived. Returns the event to emit, if any; `true` in the
    /// second slot means the inactivity timer must be re-armed.
    fn on_partial(&mut self, text: &str) -> (Option<Transcript>, bool) {
        self.pending = text.to_string();
        if text != self.last_partial {
            self.last_partial = self.pending.clone();
            (Some(Transcript::partial(text)), true)
        } else {
            (None, true)
        }
    }

    /// An upstream final arrived; it supersedes any pending partial.
    fn on_final(&mut self, text: &str) -> Option<Transcript> {
        self.pending.clear();
        self.last_partial.clear();
        if text != self.last_final {
            self.last_final = text.to_string();
            Some(Transcript::fin(text))
        } else {
            None
        }
    }

    /// The inactivity timer fired: promote the pending partial.
    fn on_timeout(&mut self) -> Option<Transcript> {
        if self.pending.is_empty() || self.pending == self.last_final {
            return None;
        }
        self.last_final = std::mem::take(&mut self.pending);
        self.last_partial.clear();
        Some(Transcript::fin(self.last_final.clone()))
    }

    /// Input closed: flush whatever is still pending.
    fn flush(&mut self) -> Option<Transcript> {
        self.on_timeout()
    }

    /// Consume raw transcript events from `rx` and emit debounced events on
    /// `tx` until the input closes or the session is cancelled. The output
    /// channel closes when this returns.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Transcript>,
        tx: mpsc::Sender<Transcript>,
        cancel: CancellationToken,
    ) {
        let timer = tokio::time::sleep(self.debounce);
        tokio::pin!(timer);
        let mut armed = false;

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(t) if t.is_final => {
                        armed = false;
                        if let Some(out) = self.on_final(&t.text) {
                            if tx.send(out).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(t) => {
                        let (out, rearm) = self.on_partial(&t.text);
                        if let Some(out) = out {
                            if tx.send(out).await.is_err() {
                                return;
                            }
                        }
                        if rearm {
                            timer.as_mut().reset(Instant::now() + self.debounce);
                            armed = true;
                        }
                    }
                    None => break,
                },
                () = &mut timer, if armed => {
                    armed = false;
                    if let Some(out) = self.on_timeout() {
                        debug!("Promoted pending partial to final: \"{}\"", out.text);
                        if tx.send(out).await.is_err() {
                            return;
                        }
                    }
                }
                () = cancel.cancelled() => break,
            }
        }

        if let Some(out) = self.flush() {
            let _ = tx.send(out).await;
        }
    }
}
