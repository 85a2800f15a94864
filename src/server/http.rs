//! Ambient HTTP routes: the reply-audio static fetch and the liveness probe
//! (§6: not part of the signaling protocol, but carried by every server in
//! this lineage).

use crate::server::ServerState;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct AudioQuery {
    #[allow(dead_code)]
    t: Option<u64>,
}

/// `GET /api/voice/audio/{session_id}?t=<ms>` -> latest `reply_segment_*.wav`
/// for the session, or 404 if none has been produced yet.
pub async fn audio_handler(
    Path(session_id): Path<String>,
    Query(_query): Query<AudioQuery>,
    State(state): State<ServerState>,
) -> Response {
    let dir = state.storage_dir.join(&session_id);
    let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut latest: Option<(std::time::SystemTime, std::path::PathBuf)> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("reply_segment_") || !name.ends_with(".wav") {
            continue;
        }
        if let Ok(meta) = entry.metadata().await {
            if let Ok(modified) = meta.modified() {
                if latest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
                    latest = Some((modified, entry.path()));
                }
            }
        }
    }

    let Some((_, path)) = latest else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "audio/wav")], bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `GET /healthz` -> `{"status":"ok","sessions":<n>}`.
pub async fn healthz_handler(State(state): State<ServerState>) -> Response {
    let sessions = state.turns.session_count().await;
    axum::Json(json!({"status": "ok", "sessions": sessions})).into_response()
}
