//! Shared fixtures: a server on an ephemeral port plus fake upstreams

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::routing::post;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use voice_roleplay::asr::Transcriber;
use voice_roleplay::llm::LlmClient;
use voice_roleplay::roles::{MemoryHistory, StaticRoles};
use voice_roleplay::storage::ObjectStore;
use voice_roleplay::tts::TtsClient;
use voice_roleplay::{Config, ServerState, SessionDeps};

pub type ClientWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const FRAME_BYTES: usize = 640;

pub fn voiced_frame() -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_BYTES);
    for i in 0..(FRAME_BYTES / 2) {
        let sample: i16 = if i % 2 == 0 { 8000 } else { -8000 };
        frame.extend_from_slice(&sample.to_le_bytes());
    }
    frame
}

pub fn silent_frame() -> Vec<u8> {
    vec![0u8; FRAME_BYTES]
}

/// In-memory object store; uploads succeed and produce stable URLs
pub struct MemStore;

#[async_trait]
impl ObjectStore for MemStore {
    async fn put(&self, name: &str, _bytes: Vec<u8>) -> Result<String> {
        Ok(name.to_string())
    }

    fn url(&self, key: &str) -> String {
        format!("http://store/segments/{}", key)
    }
}

/// Batch recognizer returning a fixed transcription
pub struct FixedTranscriber(pub &'static str);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, _audio_url: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

/// A chat endpoint that streams the given tokens as SSE deltas
pub async fn fake_llm(tokens: Vec<&'static str>) -> String {
    let mut body = String::new();
    for t in &tokens {
        let event = serde_json::json!({"choices": [{"delta": {"content": t}}]});
        body.push_str(&format!("data: {}\n\n", event));
    }
    body.push_str("data: [DONE]\n\n");

    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let body = body.clone();
            async move { ([("content-type", "text/event-stream")], body) }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/v1", listener.local_addr().unwrap());
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    base_url
}

/// A synthesizer that answers the first text request on each connection with
/// the given (sequence, samples) chunks followed by the end sentinel
pub async fn fake_tts(chunks: Vec<(i32, Vec<i16>)>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else { break };
            let chunks = chunks.clone();
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
                if ws.next().await.is_none() {
                    return;
                }
                for (seq, samples) in &chunks {
                    let mut bytes = Vec::with_capacity(samples.len() * 2);
                    for s in samples {
                        bytes.extend_from_slice(&s.to_le_bytes());
                    }
                    let msg = serde_json::json!({
                        "sequence": seq,
                        "data": BASE64.encode(&bytes),
                    });
                    if ws.send(Message::Text(msg.to_string().into())).await.is_err() {
                        return;
                    }
                }
                let _ = ws
                    .send(Message::Text(
                        serde_json::json!({"sequence": -1, "data": ""}).to_string().into(),
                    ))
                    .await;
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });
    url
}

/// A synthesizer that drips numbered chunks forever (for barge-in tests)
pub async fn fake_tts_slow() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
                if ws.next().await.is_none() {
                    return;
                }
                let samples: Vec<u8> = 1i16.to_le_bytes().to_vec();
                for seq in 0.. {
                    let msg = serde_json::json!({
                        "sequence": seq,
                        "data": BASE64.encode(&samples),
                    });
                    if ws.send(Message::Text(msg.to_string().into())).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(30)).await;
                }
            });
        }
    });
    url
}

/// A recognizer response frame in the upstream wire format, uncompressed
pub fn asr_frame(body: &serde_json::Value) -> Vec<u8> {
    let payload = body.to_string().into_bytes();
    let mut frame = vec![
        0x11,               // protocol 1, header size 1 word
        (0b1001 << 4) | 1,  // full response, sequence present
        0x10,               // JSON, no compression
        0x00,
    ];
    frame.extend_from_slice(&1u32.to_be_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

/// A streaming recognizer that reads the config frame plus one audio frame,
/// emits the given transcript bodies, then drops the connection
pub async fn fake_recognizer(bodies: Vec<serde_json::Value>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else { break };
            let bodies = bodies.clone();
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
                // config frame, then at least one audio frame
                let _ = ws.next().await;
                let _ = ws.next().await;
                for body in &bodies {
                    if ws
                        .send(Message::Binary(asr_frame(body).into()))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                // upstream goes away mid-utterance
                let _ = ws.close(None).await;
            });
        }
    });
    url
}

/// Serve the real router with the given config and deps; returns the session
/// WebSocket URL
pub async fn spawn_server(mut config: Config, transcriber: Arc<dyn Transcriber>) -> String {
    // never talk to the real recognizer from tests; keep an explicitly
    // configured fake endpoint
    if config.asr.ws_url.contains("openai.qiniu.com") {
        config.asr.ws_url = "ws://127.0.0.1:1".to_string();
    }
    let deps = SessionDeps {
        llm: LlmClient::new(config.llm.clone()),
        tts: TtsClient::new(config.tts.clone()),
        roles: Arc::new(StaticRoles::builtin()),
        history: Arc::new(MemoryHistory::new()),
        store: Arc::new(MemStore),
        transcriber,
    };
    let state = ServerState { config: Arc::new(config), deps };
    let app = voice_roleplay::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("ws://{}/v1/ws", addr)
}

/// Next text frame from the server as (type, data), skipping binary audio
pub async fn next_control(ws: &mut ClientWs) -> (String, serde_json::Value) {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for control message")
            .expect("socket closed")
            .expect("socket error");
        match msg {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                let kind = value["type"].as_str().unwrap().to_string();
                return (kind, value["data"].clone());
            }
            Message::Binary(_) => continue,
            _ => continue,
        }
    }
}

/// Like `next_control`, but skips messages until one of `kinds` arrives
pub async fn next_control_of(ws: &mut ClientWs, kinds: &[&str]) -> (String, serde_json::Value) {
    loop {
        let (kind, data) = next_control(ws).await;
        if kinds.contains(&kind.as_str()) {
            return (kind, data);
        }
    }
}
