//! Sequence reordering for synthesized chunks
//!
//! The synthesizer may deliver chunks out of order. Emission is strictly
//! ascending from sequence 0 with no gaps; out-of-order arrivals wait in a
//! small bounded window.

use std::collections::HashMap;

use tracing::warn;

use crate::types::PcmChunk;

/// Out-of-order chunks held at most; the in-flight window is practically
/// a few dozen
const WINDOW: usize = 64;

pub struct ReorderBuffer {
    expect_seq: i32,
    pending: HashMap<i32, Vec<i16>>,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self { expect_seq: 0, pending: HashMap::new() }
    }

    /// Accept one chunk; returns every chunk that is now deliverable in
    /// order.
    pub fn push(&mut self, seq: i32, samples: Vec<i16>) -> Vec<PcmChunk> {
        if seq < self.expect_seq {
            warn!("Stale synthesizer chunk seq={} (expecting {})", seq, self.expect_seq);
            return Vec::new();
        }
        if seq != self.expect_seq && self.pending.len() >= WINDOW {
            warn!("Reorder window full, dropping synthesizer chunk seq={}", seq);
            return Vec::new();
        }
        self.pending.insert(seq, samples);

        let mut ready = Vec::new();
        while let Some(samples) = self.pending.remove(&self.expect_seq) {
            ready.push(PcmChunk { seq: self.expect_seq, samples });
            self.expect_seq += 1;
        }
        ready
    }

    pub fn next_expected(&self) -> i32 {
        self.expect_seq
    }
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new()
    }
}
