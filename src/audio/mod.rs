//! Fixed-format PCM audio
//!
//! The whole pipeline speaks one format: 16 kHz, 16-bit signed little-endian,
//! mono, in 20 ms frames. Anything else is a configuration error upstream of
//! this process, not something we adapt to at runtime.

pub mod wav;

/// Samples per second
pub const SAMPLE_RATE: u32 = 16_000;

/// Frame duration in milliseconds
pub const FRAME_MS: u32 = 20;

/// Samples per frame (320 at 16 kHz / 20 ms)
pub const SAMPLES_PER_FRAME: usize = (SAMPLE_RATE as usize / 1000) * FRAME_MS as usize;

/// Bits per sample
pub const BIT_DEPTH: u16 = 16;

/// Bytes per frame (640)
pub const BYTES_PER_FRAME: usize = SAMPLES_PER_FRAME * BIT_DEPTH as usize / 8;

/// Interpret a little-endian PCM16 byte slice as samples
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Serialize samples as little-endian PCM16 bytes
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}
