//! Voice pipeline: transcoding, VAD, ASR, and TTS clients for the turn loop.
//!
//! ```rust,no_run
//! use turnkeeper::voice::vad::segments;
//! ```

pub mod asr;
pub mod silero_vad;
pub mod transcoder;
pub mod tts;
pub mod vad;
