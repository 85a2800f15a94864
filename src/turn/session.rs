//! C4 — Turn Session: per-connection accumulate -> segment -> finalize ->
//! advance state machine.
//!
//! Grounded nearly 1:1 on `original_source/voice/service/turn_manager.py`
//! (`TurnSession`, `push_chunk`, `convert_to_wav_memory`, `advance_segment`)
//! with the Rust-side session-state shape borrowed from the teacher's
//! `server/realtime_voice.rs`.

use crate::config::VoiceConfig;
use crate::registry;
use crate::voice::{transcoder, vad};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

const DECODE_INTERVAL_CHUNKS: u32 = 4;
const DECODE_INTERVAL_MS: u128 = 500;
const MIN_DURATION_DELTA_S: f32 = 0.5;
const MAX_HISTORY: usize = 20;
const CONVERT_THROTTLE: Duration = Duration::from_millis(300);
const MIN_BUFFERED_BYTES: usize = 500;
/// §5: the captured container header is retained indefinitely per session,
/// bounded to 8 KiB — enough to include the Segment/Tracks elements a
/// decoder needs, not just the magic number.
const HEADER_CAPTURE_BYTES: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Listening,
    Recording,
    Speaking,
}

impl ChunkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkState::Listening => "listening",
            ChunkState::Recording => "recording",
            ChunkState::Speaking => "speaking",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PushChunkResult {
    pub finalized: bool,
    pub state: ChunkState,
    pub transcript: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub role: &'static str,
    pub content: String,
}

/// Owned by the Turn Manager, keyed by `session_id` (§3).
pub struct TurnSession {
    pub session_id: String,
    pub dir: PathBuf,
    pub segment_index: u64,
    pub compressed_buffer: Vec<u8>,
    pub compressed_header: Option<Vec<u8>>,
    pub pcm_bytes: Option<Vec<u8>>,
    pub pcm_audio: Vec<f32>,
    pub chunk_count: u32,
    pub last_duration_s: f32,
    pub last_conversion_ts: Instant,
    pub segment_start_ts: Instant,
    pub processing_active: bool,
    pub conversation_history: Vec<ConversationTurn>,
    pub turn_number: u64,
    pub transcript: Option<String>,
    pub finalized: bool,
    conversion_lock: AsyncMutex<()>,
    voice: VoiceConfig,
}

impl TurnSession {
    pub fn new(session_id: String, dir: PathBuf, voice: VoiceConfig) -> Self {
        Self {
            session_id,
            dir,
            segment_index: 0,
            compressed_buffer: Vec::new(),
            compressed_header: None,
            pcm_bytes: None,
            pcm_audio: Vec::new(),
            chunk_count: 0,
            last_duration_s: 0.0,
            last_conversion_ts: Instant::now(),
            segment_start_ts: Instant::now(),
            processing_active: false,
            conversation_history: Vec::new(),
            turn_number: 0,
            transcript: None,
            finalized: false,
            conversion_lock: AsyncMutex::new(()),
            voice,
        }
    }

    /// §4.4 `push_chunk` algorithm.
    pub async fn push_chunk(&mut self, chunk: &[u8]) -> PushChunkResult {
        // Step 1: half-duplex gate.
        if self.processing_active {
            return PushChunkResult { finalized: false, state: ChunkState::Speaking, transcript: None };
        }

        // Step 2: archive + accumulate, capture header on first well-formed chunk.
        self.archive_chunk(chunk);
        if self.compressed_header.is_none() && transcoder::starts_with_container_header(chunk) {
            self.compressed_header = Some(chunk[..HEADER_CAPTURE_BYTES.min(chunk.len())].to_vec());
        }
        self.compressed_buffer.extend_from_slice(chunk);
        self.chunk_count += 1;

        // Step 3.
        if self.chunk_count < 2 {
            return listening();
        }

        // Step 4: decide whether to run a silence check this cycle.
        let elapsed = self.last_conversion_ts.elapsed().as_millis();
        if self.chunk_count % DECODE_INTERVAL_CHUNKS != 0 && elapsed < DECODE_INTERVAL_MS {
            return listening();
        }

        // Step 5: run the transcoder, respecting throttle + lock.
        let Some(pcm_wav) = self.try_transcode().await else {
            return listening();
        };
        self.pcm_bytes = Some(pcm_wav.clone());
        self.pcm_audio = transcoder::wav_to_f32(&pcm_wav).unwrap_or_default();

        // Step 6.
        let duration = self.pcm_audio.len() as f32 / 16000.0;
        if duration - self.last_duration_s < MIN_DURATION_DELTA_S {
            return listening();
        }
        self.last_duration_s = duration;

        // Step 7.
        let spans = vad::segments(
            registry::get_vad(),
            &self.pcm_audio,
            16000,
            self.voice.vad_threshold,
            self.voice.vad_min_speech_ms,
            self.voice.vad_min_silence_ms,
        );
        let last_end = spans.iter().map(|s| s.end_s).fold(0.0f32, f32::max);
        let silence = (duration - last_end).max(0.0);

        // Step 8.
        if (silence * 1000.0) < self.voice.vad_min_silence_ms as f32 {
            let state = if (duration - last_end) < self.voice.vad_min_silence_ms as f32 / 1000.0 {
                ChunkState::Recording
            } else {
                ChunkState::Listening
            };
            return PushChunkResult { finalized: false, state, transcript: None };
        }

        // Step 9: silence reached — set the half-duplex gate *before* ASR.
        self.processing_active = true;
        let asr = registry::get_asr(&self.voice);
        let transcript = match asr.transcribe(&pcm_wav).await {
            Ok(text) => text,
            Err(e) => {
                warn!(session_id = %self.session_id, "ASR failed: {e}");
                String::new()
            }
        };
        self.transcript = Some(transcript.clone());
        self.finalized = true;
        self.archive_transcript(&transcript);

        // Step 10.
        self.advance_segment();

        info!(session_id = %self.session_id, segment = self.segment_index, "turn finalized");
        PushChunkResult { finalized: true, state: ChunkState::Speaking, transcript: Some(transcript) }
    }

    async fn try_transcode(&mut self) -> Option<Vec<u8>> {
        if self.compressed_buffer.len() < MIN_BUFFERED_BYTES {
            return None;
        }
        if self.last_conversion_ts.elapsed() < CONVERT_THROTTLE {
            return None;
        }
        let Ok(_guard) = self.conversion_lock.try_lock() else {
            return None; // another transcode in flight; caller retries next cadence.
        };

        self.last_conversion_ts = Instant::now();
        match transcoder::transcode(&self.voice.ffmpeg_bin, &self.compressed_buffer, self.compressed_header.as_deref()).await {
            Ok(wav) => Some(wav),
            Err(e) => {
                warn!(session_id = %self.session_id, "transcode cycle failed, will keep buffering: {e}");
                None
            }
        }
    }

    /// §4.4 step 10: archive, increment, reset per-segment fields, keep the header.
    fn advance_segment(&mut self) {
        self.archive_final_segment();
        self.segment_index += 1;
        self.compressed_buffer.clear();
        self.pcm_bytes = None;
        self.pcm_audio.clear();
        self.chunk_count = 0;
        self.last_duration_s = 0.0;
        self.segment_start_ts = Instant::now();
        self.transcript = None;
        self.finalized = false;
        // compressed_header is intentionally preserved.
    }

    /// Half-duplex gate release: called when no reply was needed, TTS
    /// produced no audio, or the client sent `playback_complete`.
    pub fn clear_processing_flag(&mut self) {
        self.processing_active = false;
    }

    pub fn push_history(&mut self, role: &'static str, content: String) {
        self.conversation_history.push(ConversationTurn { role, content });
        if self.conversation_history.len() > MAX_HISTORY {
            let drop = self.conversation_history.len() - MAX_HISTORY;
            self.conversation_history.drain(0..drop);
        }
    }

    fn archive_chunk(&self, chunk: &[u8]) {
        let path = self.dir.join(format!("segment_{}.webm", self.segment_index));
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!("failed to create session dir: {e}");
            return;
        }
        if let Ok(mut existing) = std::fs::read(&path) {
            existing.extend_from_slice(chunk);
            let _ = std::fs::write(&path, existing);
        } else {
            let _ = std::fs::write(&path, chunk);
        }
    }

    fn archive_final_segment(&self) {
        let src = self.dir.join(format!("segment_{}.webm", self.segment_index));
        let dst = self.dir.join(format!("segment_{}_final.webm", self.segment_index));
        let _ = std::fs::copy(&src, &dst);
    }

    fn archive_transcript(&self, transcript: &str) {
        let path = self.dir.join(format!("segment_{}_transcript.txt", self.segment_index));
        let _ = std::fs::write(path, transcript);
    }
}

fn listening() -> PushChunkResult {
    PushChunkResult { finalized: false, state: ChunkState::Listening, transcript: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> TurnSession {
        TurnSession::new("s1".into(), PathBuf::from("/tmp/turnkeeper-test"), VoiceConfig::default())
    }

    #[tokio::test]
    async fn processing_active_discards_chunks() {
        let mut s = session();
        s.processing_active = true;
        let result = s.push_chunk(b"anything").await;
        assert!(!result.finalized);
        assert_eq!(result.state, ChunkState::Speaking);
        assert!(s.compressed_buffer.is_empty());
    }

    #[tokio::test]
    async fn first_chunk_stays_listening() {
        let mut s = session();
        let result = s.push_chunk(b"first-chunk-bytes").await;
        assert_eq!(result.state, ChunkState::Listening);
        assert_eq!(s.chunk_count, 1);
    }

    #[test]
    fn history_is_capped_at_twenty() {
        let mut s = session();
        for i in 0..25 {
            s.push_history("user", format!("msg {i}"));
        }
        assert_eq!(s.conversation_history.len(), 20);
        assert_eq!(s.conversation_history[0].content, "msg 5");
    }

    #[test]
    fn advance_segment_preserves_header_and_increments_index() {
        let mut s = session();
        s.compressed_header = Some(vec![0x1A, 0x45, 0xDF, 0xA3]);
        s.segment_index = 3;
        s.advance_segment();
        assert_eq!(s.segment_index, 4);
        assert!(s.compressed_header.is_some());
        assert!(s.compressed_buffer.is_empty());
    }
}
