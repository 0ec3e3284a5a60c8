//! Canonical RIFF/WAVE framing for recorded segments
//!
//! Segments are uploaded as PCM WAV with the standard 44-byte header so the
//! one-shot recognizer can consume them by URL.

use super::{BIT_DEPTH, SAMPLE_RATE};

/// Header length for a canonical PCM WAV file
pub const HEADER_LEN: usize = 44;

/// Wrap raw PCM16 mono bytes in a 44-byte RIFF/WAVE header
pub fn wrap_pcm(pcm: &[u8]) -> Vec<u8> {
    let data_size = pcm.len() as u32;
    let byte_rate = SAMPLE_RATE * u32::from(BIT_DEPTH) / 8;
    let block_align = BIT_DEPTH / 8;

    let mut out = Vec::with_capacity(HEADER_LEN + pcm.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_size).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes()); // PCM subchunk size
    out.extend_from_slice(&1u16.to_le_bytes()); // audio format: PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // channels: mono
    out.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BIT_DEPTH.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());
    out.extend_from_slice(pcm);
    out
}
