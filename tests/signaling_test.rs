//! Integration tests for the signaling loop (§4.6, §8): offer/answer
//! handshake, the half-duplex gate, and disconnect cleanup, driven over a
//! real WebSocket client against a locally bound server.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use turnkeeper::config::Config;
use turnkeeper::server::{build_app, build_state, ServerState};

async fn spawn_server() -> (String, ServerState) {
    let mut config = Config::default();
    config.server.storage_dir = std::env::temp_dir().join(format!(
        "turnkeeper-test-{}",
        std::process::id()
    ));
    let state = build_state(&config).expect("build state");
    let app = build_app(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{addr}"), state)
}

async fn recv_json(
    ws: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
) -> Value {
    loop {
        match ws.next().await.expect("stream closed").expect("ws error") {
            WsMessage::Text(text) => return serde_json::from_str(&text).expect("valid json frame"),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn offer_yields_ready_answer() {
    let (base, _state) = spawn_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{base}/api/voice/webrtc/sess-offer"))
        .await
        .expect("connect");

    // The server sends an initial `answer` on connect, before any client frame.
    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["type"], "answer");
    assert_eq!(frame["session_id"], "sess-offer");
    assert_eq!(frame["status"], "ready");

    ws.send(WsMessage::Text(json!({"type": "offer"}).to_string().into()))
        .await
        .expect("send offer");
    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["type"], "answer");
    assert_eq!(frame["status"], "ready");
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let (base, _state) = spawn_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{base}/api/voice/webrtc/sess-ping"))
        .await
        .expect("connect");
    let _ = recv_json(&mut ws).await; // initial answer

    ws.send(WsMessage::Text(json!({"type": "ping"}).to_string().into()))
        .await
        .expect("send ping");
    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["type"], "pong");
}

/// §9: while `processing_active` is set, every `audio_chunk` short-circuits
/// straight to `{finalized:false, state:"speaking"}` without touching the
/// transcoder/VAD/ASR pipeline.
#[tokio::test]
async fn chunks_are_gated_while_processing_is_active() {
    let (base, state) = spawn_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{base}/api/voice/webrtc/sess-gate"))
        .await
        .expect("connect");
    let _ = recv_json(&mut ws).await; // initial answer

    // Let the signaling loop register the session, then force the gate.
    let session = loop {
        if let Some(s) = state.turns.get("sess-gate").await {
            break s;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    session.lock().await.processing_active = true;

    let chunk = json!({"type": "audio_chunk", "data": BASE64.encode(b"nonsense-bytes"), "respond": false});
    for _ in 0..10 {
        ws.send(WsMessage::Text(chunk.to_string().into())).await.expect("send chunk");
        let frame = recv_json(&mut ws).await;
        assert_eq!(frame["type"], "processing_result");
        assert_eq!(frame["finalized"], false);
        assert_eq!(frame["state"], "speaking");
    }
}

#[tokio::test]
async fn disconnect_removes_the_session() {
    let (base, state) = spawn_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{base}/api/voice/webrtc/sess-bye"))
        .await
        .expect("connect");
    let _ = recv_json(&mut ws).await;

    assert!(state.turns.get("sess-bye").await.is_some());

    ws.close(None).await.expect("close");
    drop(ws);

    for _ in 0..50 {
        if state.turns.get("sess-bye").await.is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session was not removed after disconnect");
}

#[tokio::test]
async fn malformed_audio_chunk_reports_an_error_frame() {
    let (base, _state) = spawn_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{base}/api/voice/webrtc/sess-bad-b64"))
        .await
        .expect("connect");
    let _ = recv_json(&mut ws).await;

    let bad = json!({"type": "audio_chunk", "data": "not-valid-base64!!", "respond": false});
    ws.send(WsMessage::Text(bad.to_string().into())).await.expect("send");
    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["type"], "error");
}
