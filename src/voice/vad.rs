//! C3 — VAD Gate: stateless speech-span detection over a PCM buffer.
//!
//! `segments()` is a pure function of its input buffer: it resets the shared
//! Silero ONNX session's recurrent state before scanning, and all onset/
//! hangover bookkeeping lives in locals for the duration of one call. No
//! speech/silence state survives between calls, matching the in-memory path
//! `original_source/voice/vad/silero_runner.py::get_speech_segments_from_audio`
//! takes through Silero's own (stateless, from the caller's perspective)
//! `get_speech_timestamps` helper.

use crate::voice::silero_vad::{SileroSession, WINDOW_SIZE};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechSpan {
    pub start_s: f32,
    pub end_s: f32,
}

/// Run Silero VAD over `pcm` (mono float32 samples) and return ordered,
/// non-overlapping speech spans. Empty if no speech crosses `threshold` for
/// at least `min_speech_ms`, the input buffer is empty, or no VAD session is
/// available (model failed to load, per `registry::get_vad`).
pub fn segments(
    vad: Option<&Mutex<SileroSession>>,
    pcm: &[f32],
    sr: u32,
    threshold: f32,
    min_speech_ms: u64,
    min_silence_ms: u64,
) -> Vec<SpeechSpan> {
    if sr != 16000 {
        warn!(sr, "VAD gate called with non-16kHz audio; Silero expects 16kHz, proceeding anyway");
    }
    if pcm.is_empty() {
        return Vec::new();
    }
    let Some(vad) = vad else {
        return Vec::new();
    };

    let mut session = match vad.lock() {
        Ok(s) => s,
        Err(poisoned) => poisoned.into_inner(),
    };
    session.reset();

    let sr_f = sr as f32;
    let min_speech_samples = ((min_speech_ms as f32 / 1000.0) * sr_f) as usize;
    let min_silence_samples = ((min_silence_ms as f32 / 1000.0) * sr_f) as usize;

    let mut spans = Vec::new();
    let mut triggered = false;
    let mut speech_start = 0usize;
    let mut silence_start: Option<usize> = None;

    let mut offset = 0usize;
    while offset < pcm.len() {
        let end = (offset + WINDOW_SIZE).min(pcm.len());
        let mut window = pcm[offset..end].to_vec();
        if window.len() < WINDOW_SIZE {
            window.resize(WINDOW_SIZE, 0.0);
        }

        let prob = match session.infer(&window) {
            Ok(p) => p,
            Err(e) => {
                warn!("VAD inference error: {e}");
                0.0
            }
        };

        let is_speech = prob >= threshold;

        if is_speech {
            silence_start = None;
            if !triggered {
                triggered = true;
                speech_start = offset;
            }
        } else if triggered {
            let silence_begin = *silence_start.get_or_insert(offset);
            if offset - silence_begin >= min_silence_samples {
                let speech_end = silence_begin;
                if speech_end - speech_start >= min_speech_samples {
                    spans.push(SpeechSpan {
                        start_s: speech_start as f32 / sr_f,
                        end_s: speech_end as f32 / sr_f,
                    });
                }
                triggered = false;
                silence_start = None;
            }
        }

        offset += WINDOW_SIZE;
    }

    if triggered {
        let speech_end = pcm.len();
        if speech_end - speech_start >= min_speech_samples {
            spans.push(SpeechSpan {
                start_s: speech_start as f32 / sr_f,
                end_s: speech_end as f32 / sr_f,
            });
        }
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_spans() {
        let spans = segments(None, &[], 16000, 0.5, 250, 500);
        assert!(spans.is_empty());
    }

    #[test]
    fn missing_vad_session_yields_no_spans_even_with_audio() {
        let pcm = vec![0.5f32; WINDOW_SIZE * 4];
        let spans = segments(None, &pcm, 16000, 0.5, 250, 500);
        assert!(spans.is_empty());
    }
}
