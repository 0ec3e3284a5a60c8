//! Sentence merging for synthesis
//!
//! The model streams sub-word tokens; the synthesizer wants sentence-sized
//! text. Tokens accumulate until a sentence terminator appears, with an idle
//! flush so a trailing fragment cannot stall the audio.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Characters that end a speakable unit
pub const SENTENCE_TERMINATORS: [char; 5] = ['。', '!', '?', '！', '？'];

/// Flush interval when the model goes quiet mid-sentence
pub const IDLE_FLUSH: Duration = Duration::from_secs(2);

pub struct SentenceMerger {
    idle_flush: Duration,
}

impl SentenceMerger {
    pub fn new() -> Self {
        Self { idle_flush: IDLE_FLUSH }
    }

    #[cfg(test)]
    fn with_idle_flush(idle_flush: Duration) -> Self {
        Self { idle_flush }
    }

    /// Merge `token_rx` into sentences on `sentence_tx` until the input
    /// closes or the response is cancelled; any remainder is flushed once and
    /// the output closes.
    pub async fn run(
        &self,
        mut token_rx: mpsc::Receiver<String>,
        sentence_tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) {
        let mut buffer = String::new();
        let timer = tokio::time::sleep(self.idle_flush);
        tokio::pin!(timer);
        let mut armed = false;

        loop {
            tokio::select! {
                token = token_rx.recv() => match token {
                    Some(token) => {
                        buffer.push_str(&token);
                        if token.chars().any(|c| SENTENCE_TERMINATORS.contains(&c)) {
                            armed = false;
                            if !flush(&mut buffer, &sentence_tx).await {
                                return;
                            }
                        } else {
                            timer.as_mut().reset(Instant::now() + self.idle_flush);
                            armed = true;
                        }
                    }
                    None => break,
                },
                () = &mut timer, if armed => {
                    armed = false;
                    debug!("Idle flush of {} buffered chars", buffer.chars().count());
                    if !flush(&mut buffer, &sentence_tx).await {
                        return;
                    }
                }
                () = cancel.cancelled() => break,
            }
        }

        let _ = flush(&mut buffer, &sentence_tx).await;
    }
}

impl Default for SentenceMerger {
    fn default() -> Self {
        Self::new()
    }
}

/// Emit the trimmed buffer if non-empty; false when the consumer is gone
async fn flush(buffer: &mut String, tx: &mpsc::Sender<String>) -> bool {
    let sentence = std::mem::take(buffer);
    let sentence = sentence.trim();
    if sentence.is_empty() {
        return true;
    }
    tx.send(sentence.to_string()).await.is_ok()
}
