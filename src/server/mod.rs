//! Web server: HTTP routes and the voice WebSocket

pub mod messages;
pub mod ws;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::asr::BatchAsr;
use crate::config::Config;
use crate::llm::LlmClient;
use crate::roles::{MemoryHistory, RoleSummary, StaticRoles};
use crate::session::SessionDeps;
use crate::storage::HttpObjectStore;
use crate::tts::TtsClient;

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub deps: SessionDeps,
}

/// Start the voice dialog server
pub async fn start(config: Config) -> Result<()> {
    let config = Arc::new(config);
    let deps = SessionDeps {
        llm: LlmClient::new(config.llm.clone()),
        tts: TtsClient::new(config.tts.clone()),
        roles: Arc::new(StaticRoles::builtin()),
        history: Arc::new(MemoryHistory::new()),
        store: Arc::new(HttpObjectStore::new(config.storage.clone())),
        transcriber: Arc::new(BatchAsr::new(config.asr.clone())),
    };
    let state = ServerState { config: config.clone(), deps };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("bad listener address")?;

    info!(
        "Voice roleplay server listening on {} (ingestion: {:?})",
        addr, config.pipeline.mode
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind listener")?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Build the application router
pub fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_page))
        .route("/v1/hello", get(hello))
        .route("/v1/roles", get(list_roles))
        .route("/v1/ws", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn hello() -> &'static str {
    "Hello, World!"
}

#[derive(serde::Serialize)]
struct RoleList {
    roles: Vec<RoleSummary>,
}

async fn list_roles(
    State(state): State<ServerState>,
) -> Result<Json<RoleList>, (StatusCode, String)> {
    match state.deps.roles.list().await {
        Ok(roles) => Ok(Json(RoleList { roles })),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))),
    }
}

/// Minimal browser demo: mic → 640-byte PCM frames → playback queue
async fn index_page() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <title>Voice Roleplay</title>
  <style>
    body { font-family: sans-serif; padding: 20px; max-width: 640px; margin: 0 auto; }
    #log { margin-top: 16px; font-size: 15px; color: #333; white-space: pre-line; }
  </style>
</head>
<body>
  <h1>Voice Roleplay</h1>
  <button id="start">Start talking</button>
  <button id="stop">Stop</button>
  <div id="log">idle</div>
  <script>
    const FRAME_BYTES = 640;
    let ws, ctx, proc, src, stream, buf = new Int16Array(0);
    const queue = []; let playing = false;
    const log = (m) => document.getElementById('log').textContent = m;

    document.getElementById('start').onclick = async () => {
      ws = new WebSocket(`${location.protocol === 'https:' ? 'wss' : 'ws'}://${location.host}/v1/ws`);
      ws.binaryType = 'arraybuffer';
      ws.onmessage = (ev) => {
        if (typeof ev.data === 'string') {
          const m = JSON.parse(ev.data);
          if (m.type === 'state') log(m.data.state + (m.data.isVad ? ' (voice)' : ''));
          if (m.type === 'asr_result') log('you: ' + m.data.text);
          if (m.type === 'error') log('error: ' + m.data.error);
        } else { queue.push(ev.data); playNext(); }
      };
      stream = await navigator.mediaDevices.getUserMedia({ audio: true });
      ctx = new AudioContext({ sampleRate: 16000 });
      src = ctx.createMediaStreamSource(stream);
      proc = ctx.createScriptProcessor(1024, 1, 1);
      src.connect(proc); proc.connect(ctx.destination);
      proc.onaudioprocess = (e) => {
        const f = e.inputBuffer.getChannelData(0);
        const pcm = new Int16Array(f.length);
        for (let i = 0; i < f.length; i++) pcm[i] = Math.max(-1, Math.min(1, f[i])) * 0x7fff;
        const merged = new Int16Array(buf.length + pcm.length);
        merged.set(buf); merged.set(pcm, buf.length); buf = merged;
        const n = FRAME_BYTES / 2;
        while (buf.length >= n) { ws.send(buf.slice(0, n).buffer); buf = buf.slice(n); }
      };
    };

    document.getElementById('stop').onclick = () => {
      if (ws) { ws.send(JSON.stringify({ type: 'intrupt', data: {} })); ws.close(); }
      [proc, src].forEach(n => n && n.disconnect());
      if (stream) stream.getTracks().forEach(t => t.stop());
      if (ctx) ctx.close();
      buf = new Int16Array(0); queue.length = 0; playing = false;
      log('stopped');
    };

    function playNext() {
      if (playing || !queue.length) return;
      playing = true;
      const bytes = queue.shift();
      const audio = ctx.createBuffer(1, bytes.byteLength / 2, 16000);
      const ch = audio.getChannelData(0);
      const view = new DataView(bytes);
      for (let i = 0; i < ch.length; i++) ch[i] = view.getInt16(i * 2, true) / 32768;
      const node = ctx.createBufferSource();
      node.buffer = audio; node.connect(ctx.destination);
      node.onended = () => { playing = false; playNext(); };
      node.start();
    }
  </script>
</body>
</html>
"#,
    )
}
