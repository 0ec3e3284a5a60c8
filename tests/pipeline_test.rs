//! End-to-end response pipeline over a real socket with fake upstreams:
//! VAD segmentation → batch recognition → chat → synthesis → client

mod common;

use std::sync::Arc;

use futures_util::SinkExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use common::{
    fake_llm, fake_recognizer, fake_tts, fake_tts_slow, next_control, next_control_of,
    silent_frame, spawn_server, voiced_frame, FixedTranscriber,
};
use voice_roleplay::{Config, IngestMode};

async fn vad_config(llm_tokens: Vec<&'static str>, tts_url: String) -> Config {
    let mut config = Config::default();
    config.pipeline.mode = IngestMode::Vad;
    config.llm.base_url = fake_llm(llm_tokens).await;
    config.tts.ws_url = tts_url;
    config
}

async fn speak_one_utterance(ws: &mut common::ClientWs) {
    for _ in 0..50 {
        ws.send(Message::Binary(voiced_frame().into())).await.unwrap();
    }
    for _ in 0..50 {
        ws.send(Message::Binary(silent_frame().into())).await.unwrap();
    }
}

#[tokio::test]
async fn test_happy_path_voice_to_reply() {
    let tts_url = fake_tts(vec![
        (2, vec![20, 21]),
        (0, vec![0, 1]),
        (1, vec![10, 11]),
        (3, vec![30, 31]),
    ])
    .await;
    let config = vad_config(vec!["你好", "呀。"], tts_url).await;
    let url = spawn_server(config, Arc::new(FixedTranscriber("hello world"))).await;

    let (mut ws, _) = connect_async(&url).await.unwrap();
    let (kind, data) = next_control(&mut ws).await;
    assert_eq!((kind.as_str(), data["state"].as_str().unwrap()), ("state", "idle"));

    speak_one_utterance(&mut ws).await;

    // the segmenter hears us
    let (_, data) = next_control_of(&mut ws, &["state"]).await;
    assert_eq!(data["state"], "listening");

    // one transcription for the uploaded segment
    let (_, data) = next_control_of(&mut ws, &["asr_result"]).await;
    assert_eq!(data["text"], "hello world");
    assert_eq!(data["seg_id"], 0);
    assert!(data["file_url"].as_str().unwrap().contains("seg_0.wav"));

    // a single balanced response; permuted synthesizer arrivals reach the
    // client reordered as 0, 1, 2, 3
    let (kind, _) = next_control_of(&mut ws, &["tts_start"]).await;
    assert_eq!(kind, "tts_start");
    let mut seqs = Vec::new();
    loop {
        let (kind, data) = next_control_of(&mut ws, &["tts_chunk", "tts_end"]).await;
        if kind == "tts_end" {
            break;
        }
        seqs.push(data["seq"].as_u64().unwrap());
        assert!(data["pcm"].as_str().is_some());
    }
    assert_eq!(seqs, vec![0, 1, 2, 3]);

    // and the session is ready for the next utterance
    let (_, data) = next_control_of(&mut ws, &["state"]).await;
    assert_eq!(data["state"], "idle");
}

#[tokio::test]
async fn test_streaming_upstream_drop_flushes_partial_and_replies() {
    // the recognizer emits one partial and then disconnects; the finalizer
    // must still produce a final and the reply must proceed
    let recognizer_url =
        fake_recognizer(vec![serde_json::json!({"result": {"text": "讲个笑话"}})]).await;
    let tts_url = fake_tts(vec![(0, vec![1, 2]), (1, vec![3, 4])]).await;

    let mut config = Config::default();
    config.pipeline.mode = IngestMode::Streaming;
    config.asr.ws_url = recognizer_url;
    config.llm.base_url = fake_llm(vec!["好，", "听着。"]).await;
    config.tts.ws_url = tts_url;
    let url = spawn_server(config, Arc::new(FixedTranscriber("unused"))).await;

    let (mut ws, _) = connect_async(&url).await.unwrap();
    let _ = next_control(&mut ws).await; // idle

    for _ in 0..4 {
        ws.send(Message::Binary(voiced_frame().into())).await.unwrap();
    }

    // the partial surfaces while the utterance is still open
    let (_, data) = next_control_of(&mut ws, &["asr_result"]).await;
    assert_eq!(data["text"], "讲个笑话");

    // debounce flushes the same text as the final, and the reply runs
    let (_, data) = next_control_of(&mut ws, &["asr_result"]).await;
    assert_eq!(data["text"], "讲个笑话");
    let _ = next_control_of(&mut ws, &["tts_start"]).await;
    let (_, data) = next_control_of(&mut ws, &["tts_chunk"]).await;
    assert_eq!(data["seq"], 0);
    let _ = next_control_of(&mut ws, &["tts_end"]).await;
    let (_, data) = next_control_of(&mut ws, &["state"]).await;
    assert_eq!(data["state"], "idle");
}

#[tokio::test]
async fn test_barge_in_aborts_and_recovers() {
    let tts_url = fake_tts_slow().await;
    let config = vad_config(vec!["我给你讲个", "长长的故事。"], tts_url).await;
    let url = spawn_server(config, Arc::new(FixedTranscriber("讲个故事"))).await;

    let (mut ws, _) = connect_async(&url).await.unwrap();
    let _ = next_control(&mut ws).await;

    speak_one_utterance(&mut ws).await;
    let _ = next_control_of(&mut ws, &["tts_start"]).await;
    // at least one chunk is flowing
    let _ = next_control_of(&mut ws, &["tts_chunk"]).await;

    // barge in
    ws.send(Message::Text(r#"{"type":"intrupt","data":{}}"#.into()))
        .await
        .unwrap();

    // the ack and exactly one tts_end both arrive (order unspecified)
    let mut saw_ack = false;
    let mut saw_end = false;
    while !(saw_ack && saw_end) {
        let (kind, data) = next_control_of(&mut ws, &["intrupt", "tts_end"]).await;
        match kind.as_str() {
            "intrupt" => {
                assert_eq!(data["ack"], true);
                saw_ack = true;
            }
            "tts_end" => {
                assert!(!saw_end, "tts_end must be emitted exactly once");
                saw_end = true;
            }
            _ => unreachable!(),
        }
    }

    // state settles back to idle
    let (_, data) = next_control_of(&mut ws, &["state"]).await;
    assert_eq!(data["state"], "idle");

    // a following utterance starts a fresh response
    speak_one_utterance(&mut ws).await;
    let (_, data) = next_control_of(&mut ws, &["asr_result"]).await;
    assert_eq!(data["seg_id"], 1);
    let (kind, _) = next_control_of(&mut ws, &["tts_start"]).await;
    assert_eq!(kind, "tts_start");
}
