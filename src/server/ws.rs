//! Voice session WebSocket transport
//!
//! One duplex socket per session: binary frames are 640-byte PCM, text
//! frames are `{type, data}` control envelopes. A single writer task
//! serializes all egress; inbound audio goes through a bounded channel that
//! drops frames rather than grow without bound.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::BYTES_PER_FRAME;
use crate::config::IngestMode;
use crate::server::messages::{ControlMessage, Envelope};
use crate::server::ServerState;
use crate::session::{OutboundFrame, Session, SessionState};
use crate::types::VoiceError;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    user_id: Option<String>,
    role_id: Option<i64>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<ServerState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_session(socket, state, query))
}

async fn handle_session(socket: WebSocket, state: ServerState, query: WsQuery) {
    let config = state.config.clone();
    let user_id = query
        .user_id
        .unwrap_or_else(|| config.pipeline.default_user_id.clone());
    let role_id = query.role_id.unwrap_or(config.pipeline.default_role_id);
    info!(
        "Voice session connected: user={} role={} mode={:?}",
        user_id, role_id, config.pipeline.mode
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(64);
    let session = Session::new(user_id, role_id, state.deps.clone(), config.clone(), out_tx);
    let cancel = session.cancel_token();

    // single writer: control messages and playback audio are linearized here
    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                () = writer_cancel.cancelled() => break,
                frame = out_rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            let result = match frame {
                OutboundFrame::Control(msg) => {
                    ws_tx
                        .send(Message::Text(
                            serde_json::to_string(&msg).unwrap_or_default().into(),
                        ))
                        .await
                }
                OutboundFrame::Audio(bytes) => ws_tx.send(Message::Binary(bytes.into())).await,
            };
            if result.is_err() {
                // a failed write is a disconnect
                writer_cancel.cancel();
                break;
            }
        }
    });

    let (audio_tx, audio_rx) = mpsc::channel(config.pipeline.audio_channel_capacity);
    match config.pipeline.mode {
        IngestMode::Streaming => session.start_streaming(audio_rx),
        IngestMode::Vad => session.start_vad(audio_rx),
    }

    session
        .send_control(ControlMessage::State {
            state: SessionState::Idle.as_str().to_string(),
            is_vad: false,
            seg_id: None,
        })
        .await;

    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            msg = ws_rx.next() => match msg {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    debug!("Session socket error: {}", e);
                    break;
                }
                None => break,
            },
        };
        match msg {
            Message::Binary(data) => {
                if data.len() != BYTES_PER_FRAME {
                    warn!(
                        "Invalid inbound frame size: got {} bytes, want {}",
                        data.len(),
                        BYTES_PER_FRAME
                    );
                    continue;
                }
                // the bot is talking; don't transcribe it
                if session.state() == SessionState::Responding {
                    continue;
                }
                if audio_tx.try_send(data.to_vec()).is_err() {
                    debug!("Audio channel full, dropping frame");
                }
            }
            Message::Text(text) => dispatch_control(&session, &text).await,
            Message::Close(_) => {
                info!("Voice session disconnected");
                break;
            }
            _ => {}
        }
    }

    session.shutdown();
    drop(audio_tx);
    let _ = writer.await;
    info!("Voice session closed");
}

/// Dispatch one inbound control envelope; bad input answers with an error
/// message and the session lives on
async fn dispatch_control(session: &Arc<Session>, text: &str) {
    match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => match envelope.kind.as_str() {
            "intrupt" => session.interrupt().await,
            "translate" => {
                session
                    .send_control(ControlMessage::Translate(envelope.data))
                    .await;
            }
            other => {
                let err = VoiceError::Transport(format!("unknown message type \"{}\"", other));
                session
                    .send_control(ControlMessage::Error { error: err.to_string() })
                    .await;
            }
        },
        Err(e) => {
            debug!("Malformed control message: {}", e);
            let err = VoiceError::Transport(format!("malformed control message: {}", e));
            session
                .send_control(ControlMessage::Error { error: err.to_string() })
                .await;
        }
    }
}
