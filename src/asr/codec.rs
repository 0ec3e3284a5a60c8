//! Upstream recognizer wire format
//!
//! Binary frames: a 4-byte header, a big-endian sequence number, a big-endian
//! payload length, then the payload. Payloads are JSON (config) or raw PCM
//! (audio chunks), gzip-compressed either way. Server responses use the same
//! envelope around a JSON body carrying partial or final transcript text.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tracing::warn;

use crate::audio::SAMPLE_RATE;
use crate::types::Transcript;

const PROTOCOL_VERSION: u8 = 0b0001;
const HEADER_SIZE_WORDS: u8 = 0b0001;
const MSG_TYPE_CONFIG: u8 = 0b0001;
const MSG_TYPE_AUDIO: u8 = 0b0010;
const FLAG_SEQUENCE: u8 = 0b0001;
const SERIALIZATION_JSON: u8 = 0b0001;
const COMPRESSION_GZIP: u8 = 0b0001;

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).context("gzip write failed")?;
    encoder.finish().context("gzip finish failed")
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).context("gunzip failed")?;
    Ok(out)
}

fn header(message_type: u8) -> [u8; 4] {
    [
        (PROTOCOL_VERSION << 4) | HEADER_SIZE_WORDS,
        (message_type << 4) | FLAG_SEQUENCE,
        (SERIALIZATION_JSON << 4) | COMPRESSION_GZIP,
        0x00, // reserved
    ]
}

/// Builds request frames, owning the per-connection sequence counter
pub struct FrameEncoder {
    seq: u32,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self { seq: 0 }
    }

    /// The one-time connection config frame
    pub fn config_frame(&mut self, model_name: &str) -> Result<Vec<u8>> {
        let payload = serde_json::json!({
            "user": { "uid": uuid::Uuid::new_v4().to_string() },
            "audio": {
                "format": "pcm",
                "sample_rate": SAMPLE_RATE,
                "bits": 16,
                "channel": 1,
                "codec": "raw",
            },
            "request": {
                "model_name": model_name,
                "enable_punc": true,
            },
        });
        self.frame(MSG_TYPE_CONFIG, payload.to_string().as_bytes())
    }

    /// One PCM frame wrapped as an audio-chunk frame
    pub fn audio_frame(&mut self, pcm: &[u8]) -> Result<Vec<u8>> {
        self.frame(MSG_TYPE_AUDIO, pcm)
    }

    fn frame(&mut self, message_type: u8, payload: &[u8]) -> Result<Vec<u8>> {
        let compressed = gzip(payload)?;
        self.seq += 1;

        let mut msg = Vec::with_capacity(12 + compressed.len());
        msg.extend_from_slice(&header(message_type));
        msg.extend_from_slice(&self.seq.to_be_bytes());
        msg.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
        msg.extend_from_slice(&compressed);
        Ok(msg)
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a server frame into a transcript event.
///
/// Returns `None` for frames without text and for undecodable frames; the
/// stream continues either way.
pub fn decode_response(data: &[u8]) -> Option<Transcript> {
    if data.len() < 4 {
        return None;
    }

    let header_words = (data[0] & 0x0f) as usize;
    let header_bytes = header_words * 4;
    if header_bytes == 0 || header_bytes > data.len() {
        return None;
    }

    let mut payload = &data[header_bytes..];

    // optional sequence number
    let flags = data[1] & 0x0f;
    if flags & FLAG_SEQUENCE != 0 {
        if payload.len() < 4 {
            return None;
        }
        payload = &payload[4..];
    }

    // payload length prefix
    if payload.len() >= 4 {
        let payload_size = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        payload = &payload[4..];
        if payload_size > 0 && payload_size <= payload.len() {
            payload = &payload[..payload_size];
        }
    }
    if payload.is_empty() {
        return None;
    }

    let body;
    if data[2] & 0x0f & COMPRESSION_GZIP != 0 {
        match gunzip(payload) {
            Ok(unzipped) => body = unzipped,
            Err(e) => {
                warn!("Undecodable recognizer frame: {}", e);
                return None;
            }
        }
    } else {
        body = payload.to_vec();
    }

    let obj: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!("Recognizer frame is not JSON: {}", e);
            return None;
        }
    };

    extract_transcript(&obj)
}

/// Text precedence: `result.text`, then `payload_msg.result.text`, then a
/// top-level `text`. Finality comes from the `result` object alone.
fn extract_transcript(obj: &serde_json::Value) -> Option<Transcript> {
    if let Some(result) = obj.get("result").filter(|r| r.is_object()) {
        return transcript_from_result(result);
    }
    if let Some(result) = obj
        .pointer("/payload_msg/result")
        .filter(|r| r.is_object())
    {
        return transcript_from_result(result);
    }
    if let Some(text) = obj.get("text").and_then(|t| t.as_str()) {
        if text.is_empty() {
            return None;
        }
        return Some(Transcript::partial(text));
    }
    None
}

fn transcript_from_result(result: &serde_json::Value) -> Option<Transcript> {
    let text = match result.get("text") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    if text.is_empty() {
        return None;
    }
    Some(Transcript { text, is_final: result_is_final(result) })
}

fn result_is_final(result: &serde_json::Value) -> bool {
    if let Some(t) = result.get("type").and_then(|t| t.as_str()) {
        if t.eq_ignore_ascii_case("final") {
            return true;
        }
    }
    if result.get("is_final").and_then(|f| f.as_bool()) == Some(true) {
        return true;
    }
    match result.get("status") {
        Some(serde_json::Value::Number(n)) => n.as_i64() == Some(2),
        Some(serde_json::Value::String(s)) => {
            let s = s.to_lowercase();
            s.contains("final") || s.contains("completed")
        }
        _ => false,
    }
}

/// Build a response frame the way the upstream does; used by tests that
/// stand in for the remote recognizer.
#[cfg(test)]
pub(crate) fn encode_server_frame(
    body: &serde_json::Value,
    with_seq: bool,
    compress: bool,
) -> Vec<u8> {
    let json = body.to_string().into_bytes();
    let payload = if compress { gzip(&json).unwrap() } else { json };
    let flags = if with_seq { FLAG_SEQUENCE } else { 0 };
    let compression = if compress { COMPRESSION_GZIP } else { 0 };

    let mut frame = vec![
        (PROTOCOL_VERSION << 4) | HEADER_SIZE_WORDS,
        (0b1001 << 4) | flags,
        (SERIALIZATION_JSON << 4) | compression,
        0x00,
    ];
    if with_seq {
        frame.extend_from_slice(&7u32.to_be_bytes());
    }
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}
