//! C6 — Signaling Loop: one bidirectional text-frame channel per session,
//! multiplexing audio chunks and control messages.
//!
//! Grounded on the teacher's `server/realtime_voice.rs` WS handler shape
//! (split socket, dedicated sender task, safe-send-on-disconnect) and
//! `original_source/voice/service/voice_session.py` for the message
//! vocabulary and per-turn dispatch order.

use crate::server::ServerState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientFrame {
    #[serde(rename = "offer")]
    Offer,
    #[serde(rename = "audio_chunk")]
    AudioChunk { data: String, #[serde(default)] respond: bool },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "playback_complete")]
    PlaybackComplete,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ServerFrame {
    #[serde(rename = "answer")]
    Answer { session_id: String, status: &'static str },
    #[serde(rename = "processing_result")]
    ProcessingResult {
        ok: bool,
        finalized: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
        state: &'static str,
    },
    #[serde(rename = "audio_ready")]
    AudioReady { audio_path: String, audio_file: String },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error { error: String },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<ServerState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_session(socket, session_id, state))
}

struct AudioJob {
    bytes: Vec<u8>,
    respond: bool,
}

async fn handle_session(socket: WebSocket, session_id: String, state: ServerState) {
    let (mut sink, mut stream) = futures_util::StreamExt::split(socket);
    let (tx, mut rx) = mpsc::channel::<Message>(64);

    let sender = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if futures_util::SinkExt::send(&mut sink, msg).await.is_err() {
                break;
            }
        }
    });

    let send = |tx: &mpsc::Sender<Message>, frame: ServerFrame| {
        let text = serde_json::to_string(&frame).unwrap_or_default();
        let tx = tx.clone();
        async move {
            let _ = tx.send(Message::Text(text.into())).await;
        }
    };

    let session = state.turns.start(&session_id).await;
    info!(session_id = %session_id, "voice session connected");

    // §4.6/§5: `push_chunk` runs on a dedicated worker, off the read loop, so
    // a ping/playback_complete from the same client is never queued behind an
    // in-flight transcode/ASR cycle. The worker is the single consumer of
    // this channel, which keeps processing_result frames in arrival order.
    let (audio_tx, audio_rx) = mpsc::channel::<AudioJob>(64);
    let worker = tokio::spawn(run_audio_worker(
        state.clone(),
        session.clone(),
        session_id.clone(),
        tx.clone(),
        audio_rx,
    ));

    send(&tx, ServerFrame::Answer { session_id: session_id.clone(), status: "ready" }).await;

    while let Some(Ok(msg)) = futures_util::StreamExt::next(&mut stream).await {
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!(session_id = %session_id, "malformed frame: {e}");
                continue;
            }
        };

        match frame {
            ClientFrame::Offer => {
                send(&tx, ServerFrame::Answer { session_id: session_id.clone(), status: "ready" }).await;
            }
            ClientFrame::Ping => {
                send(&tx, ServerFrame::Pong).await;
            }
            ClientFrame::PlaybackComplete => {
                state.turns.clear_processing_flag(&session_id).await;
            }
            ClientFrame::AudioChunk { data, respond } => {
                let Ok(bytes) = BASE64.decode(&data) else {
                    send(&tx, ServerFrame::Error { error: "invalid base64 audio_chunk".to_string() }).await;
                    continue;
                };
                if audio_tx.send(AudioJob { bytes, respond }).await.is_err() {
                    break; // worker gone; nothing left to serve this connection.
                }
            }
        }
    }

    drop(audio_tx);
    worker.abort();
    state.turns.remove(&session_id).await;
    sender.abort();
    info!(session_id = %session_id, "voice session disconnected");
}

/// Single consumer of a session's `audio_chunk` jobs: runs `push_chunk`
/// (transcode/VAD/ASR) off the signaling read loop, emits `processing_result`
/// in the order jobs were enqueued, and dispatches the reply pipeline.
async fn run_audio_worker(
    state: ServerState,
    session: std::sync::Arc<tokio::sync::Mutex<crate::turn::session::TurnSession>>,
    session_id: String,
    tx: mpsc::Sender<Message>,
    mut jobs: mpsc::Receiver<AudioJob>,
) {
    while let Some(job) = jobs.recv().await {
        let result = {
            let mut session = session.lock().await;
            session.push_chunk(&job.bytes).await
        };

        let frame = ServerFrame::ProcessingResult {
            ok: true,
            finalized: result.finalized,
            transcript: result.transcript.clone(),
            state: result.state.as_str(),
        };
        if tx.send(Message::Text(serde_json::to_string(&frame).unwrap_or_default().into())).await.is_err() {
            break;
        }

        if result.finalized {
            if job.respond {
                if let Some(transcript) = result.transcript.filter(|t| !t.trim().is_empty()) {
                    spawn_reply(state.clone(), session.clone(), session_id.clone(), transcript, tx.clone());
                } else {
                    state.turns.clear_processing_flag(&session_id).await;
                }
            } else {
                state.turns.clear_processing_flag(&session_id).await;
            }
        }
    }
}

/// §4.6: spawned fire-and-forget so the signaling loop stays responsive;
/// clears `processing_active` on every exit path per §9.
fn spawn_reply(
    state: ServerState,
    session: std::sync::Arc<tokio::sync::Mutex<crate::turn::session::TurnSession>>,
    session_id: String,
    transcript: String,
    tx: mpsc::Sender<Message>,
) {
    tokio::spawn(async move {
        {
            let mut session = session.lock().await;
            session.push_history("user", transcript.clone());
        }

        let (script, raw_script) = match crate::prompt::load_script(&state.script_config_path, &state.raw_script_path)
        {
            Ok(v) => v,
            Err(e) => {
                warn!(session_id = %session_id, "failed to load script config: {e}");
                (crate::prompt::ScriptConfig::default(), String::new())
            }
        };

        let history: Vec<(&'static str, String)> = {
            let session = session.lock().await;
            session.conversation_history.iter().map(|t| (t.role, t.content.clone())).collect()
        };

        let outcome = crate::reply::generate_reply(
            &state.llm,
            &state.kb,
            &state.external_api,
            &script,
            &raw_script,
            &history,
            &transcript,
        )
        .await;

        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                warn!(session_id = %session_id, "reply pipeline failed: {e}");
                let _ = tx.send(Message::Text(json!({"type": "error", "error": e.to_string()}).to_string().into())).await;
                state.turns.clear_processing_flag(&session_id).await;
                return;
            }
        };

        let segment_index = {
            let mut session = session.lock().await;
            session.push_history("assistant", outcome.text.clone());
            session.turn_number += 1;
            session.turn_number
        };

        if state.voice_config.tts_voice.is_empty() {
            state.turns.clear_processing_flag(&session_id).await;
            return;
        }

        let cleaned = crate::reply::clean_text_for_tts(&outcome.text);
        let dir = state.storage_dir.join(&session_id);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!(session_id = %session_id, "failed to create session dir: {e}");
            state.turns.clear_processing_flag(&session_id).await;
            return;
        }
        let wav_path = dir.join(format!("reply_segment_{segment_index}.wav"));
        let tts = crate::voice::tts::TtsClient::new(state.voice_config.tts_bin.clone());
        let use_cuda = crate::registry::cuda_available(&state.voice_config);
        let ok = tts.synthesize(&state.voice_config.tts_voice, &cleaned, wav_path.as_path(), use_cuda).await;

        if ok {
            let t = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis();
            let audio_path = format!("/api/voice/audio/{session_id}?t={t}");
            let _ = tx
                .send(Message::Text(
                    serde_json::to_string(&ServerFrame::AudioReady {
                        audio_path,
                        audio_file: format!("reply_segment_{segment_index}.wav"),
                    })
                    .unwrap_or_default()
                    .into(),
                ))
                .await;
            // `processing_active` stays set until the client sends
            // `playback_complete`, per §9.
        } else {
            state.turns.clear_processing_flag(&session_id).await;
        }
    });
}
