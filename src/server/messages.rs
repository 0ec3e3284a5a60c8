//! Control messages on the client WebSocket
//!
//! Text frames carry a `{type, data}` envelope in both directions; binary
//! frames carry raw PCM. Ingress is dispatched by the `type` string so a
//! malformed or unknown message never kills the session.

use serde::{Deserialize, Serialize};

/// Outbound control message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ControlMessage {
    State {
        state: String,
        #[serde(rename = "isVad")]
        is_vad: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        seg_id: Option<u32>,
    },
    AsrResult {
        text: String,
        seg_id: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
    },
    TtsStart {},
    TtsChunk {
        seq: u32,
        /// base64 PCM16 little-endian
        pcm: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    TtsEnd {},
    Intrupt {
        ack: bool,
    },
    Error {
        error: String,
    },
    /// Reflected back to the client as-is
    Translate(serde_json::Value),
}

/// Inbound envelope; `data` is dispatched by `type`
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}
