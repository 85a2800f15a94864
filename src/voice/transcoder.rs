//! C2 — Transcoder: streaming compressed audio -> 16 kHz mono PCM16 WAV.
//!
//! Spawns a short-lived `ffmpeg` process per call; no state is kept between
//! invocations beyond the session's own header-retention caller-side logic
//! (`compressed_header`, owned by `TurnSession`). Grounded on
//! `original_source/voice/service/turn_manager.py::convert_to_wav_memory`
//! (header-prepend repair, timeout, nonzero-exit handling) and the teacher's
//! own `decode_webm_to_pcm` subprocess-pipe shape.

use crate::error::AgentError;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

const TIMEOUT: Duration = Duration::from_secs(5);

/// EBML header magic bytes that open a well-formed WebM segment.
pub const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Transcode a compressed audio buffer to 16 kHz mono PCM16 WAV bytes.
///
/// If `header` is present and `compressed` doesn't already start with it, the
/// header is prepended first — mid-stream container fragments from browsers
/// typically lack the initial segment header and are otherwise undecodable.
pub async fn transcode(
    ffmpeg_bin: &str,
    compressed: &[u8],
    header: Option<&[u8]>,
) -> Result<Vec<u8>, AgentError> {
    let payload = match header {
        Some(h) if !compressed.starts_with(h) => {
            let mut buf = Vec::with_capacity(h.len() + compressed.len());
            buf.extend_from_slice(h);
            buf.extend_from_slice(compressed);
            buf
        }
        _ => compressed.to_vec(),
    };

    if payload.len() < 500 {
        return Err(AgentError::MediaDecode("payload below 500-byte minimum".into()));
    }

    let fut = run_ffmpeg(ffmpeg_bin, payload);
    match tokio::time::timeout(TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::MediaDecode("transcoder timed out after 5s".into())),
    }
}

async fn run_ffmpeg(ffmpeg_bin: &str, payload: Vec<u8>) -> Result<Vec<u8>, AgentError> {
    let mut child = Command::new(ffmpeg_bin)
        .args([
            "-f", "webm",
            "-err_detect", "ignore_err",
            "-i", "pipe:0",
            "-ar", "16000",
            "-ac", "1",
            "-c:a", "pcm_s16le",
            "-f", "wav",
            "-loglevel", "error",
            "pipe:1",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AgentError::MediaDecode(format!("failed to spawn ffmpeg: {e}")))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| AgentError::MediaDecode("ffmpeg stdin unavailable".into()))?;

    let writer = tokio::spawn(async move {
        let _ = stdin.write_all(&payload).await;
        drop(stdin);
    });

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| AgentError::MediaDecode(format!("ffmpeg wait failed: {e}")))?;
    let _ = writer.await;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AgentError::MediaDecode(format!(
            "ffmpeg exited with {}: {}",
            output.status, stderr
        )));
    }
    if output.stdout.is_empty() {
        return Err(AgentError::MediaDecode("ffmpeg produced no output".into()));
    }

    Ok(output.stdout)
}

/// Decode a 16kHz mono PCM16 WAV byte buffer into f32 samples in [-1, 1] for
/// the VAD gate.
pub fn wav_to_f32(wav_bytes: &[u8]) -> Result<Vec<f32>, AgentError> {
    let cursor = std::io::Cursor::new(wav_bytes);
    let mut reader = hound::WavReader::new(cursor)
        .map_err(|e| AgentError::MediaDecode(format!("invalid WAV output: {e}")))?;
    let samples: Vec<f32> = reader
        .samples::<i16>()
        .filter_map(|s| s.ok())
        .map(|s| s as f32 / 32768.0)
        .collect();
    if samples.is_empty() {
        warn!("transcoder produced a WAV with no decodable samples");
    }
    Ok(samples)
}

/// True if `chunk` opens with a well-formed container header.
pub fn starts_with_container_header(chunk: &[u8]) -> bool {
    chunk.len() >= 4 && chunk[..4] == EBML_MAGIC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_ebml_header() {
        let mut chunk = EBML_MAGIC.to_vec();
        chunk.extend_from_slice(&[0, 1, 2, 3]);
        assert!(starts_with_container_header(&chunk));
        assert!(!starts_with_container_header(&[0, 1, 2, 3]));
        assert!(!starts_with_container_header(&[0x1A, 0x45]));
    }

    #[test]
    fn wav_to_f32_round_trips_silence() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let mut writer = hound::WavWriter::new(cursor, spec).unwrap();
            for _ in 0..1600 {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        let samples = wav_to_f32(&buf).unwrap();
        assert_eq!(samples.len(), 1600);
        assert!(samples.iter().all(|&s| s == 0.0));
    }
}
