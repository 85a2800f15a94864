//! Low-level Silero VAD ONNX session wrapper.
//!
//! This is intentionally dumb: it owns the loaded ONNX `Session` (the
//! expensive part, and the piece the Model Registry keeps as a process-wide
//! singleton) plus the small recurrent state tensor the model consumes. It
//! knows nothing about onset/hangover timing — that windowed-scan logic lives
//! in `vad.rs`, which resets this session's state at the start of every
//! `segments()` call so the gate itself stays stateless across calls.
//!
//! The model is auto-downloaded (~2MB) on first use.

use anyhow::{Context, Result};
use ort::session::Session;
use std::path::PathBuf;
use tracing::info;

const SILERO_VAD_URL: &str =
    "https://github.com/snakers4/silero-vad/raw/master/src/silero_vad/data/silero_vad.onnx";
const MODEL_FILENAME: &str = "silero_vad.onnx";
const SAMPLE_RATE: i64 = 16000;
pub const WINDOW_SIZE: usize = 512; // 32ms at 16kHz

pub struct SileroSession {
    session: Session,
    /// Hidden state tensor, shape (2, 1, 128).
    state: Vec<f32>,
}

impl SileroSession {
    pub fn load() -> Result<Self> {
        let model_path = Self::ensure_model()?;

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(&model_path)
            .context("failed to create ONNX session for Silero VAD")?;

        info!("Silero VAD loaded from {}", model_path.display());

        Ok(Self {
            session,
            state: vec![0.0f32; 2 * 1 * 128],
        })
    }

    fn ensure_model() -> Result<PathBuf> {
        let model_dir = crate::config::data_dir()?.join("models");
        std::fs::create_dir_all(&model_dir).context("creating models directory")?;

        let model_path = model_dir.join(MODEL_FILENAME);
        if model_path.exists() {
            return Ok(model_path);
        }

        info!("downloading Silero VAD model to {}", model_path.display());
        let response =
            reqwest::blocking::get(SILERO_VAD_URL).context("downloading Silero VAD model")?;
        if !response.status().is_success() {
            anyhow::bail!("failed to download Silero VAD model: HTTP {}", response.status());
        }
        let bytes = response.bytes().context("reading Silero VAD model bytes")?;
        std::fs::write(&model_path, &bytes).context("saving Silero VAD model")?;
        info!("Silero VAD model downloaded ({} bytes)", bytes.len());
        Ok(model_path)
    }

    /// Zero the recurrent state. Called at the start of every `segments()` call
    /// so the gate is a pure function of its input buffer.
    pub fn reset(&mut self) {
        self.state.fill(0.0);
    }

    /// Run one window (exactly `WINDOW_SIZE` samples) through the model and
    /// return the speech probability, updating the recurrent state in place.
    pub fn infer(&mut self, window: &[f32]) -> Result<f32> {
        use ort::value::Value;

        let input = Value::from_array(([1usize, window.len()], window.to_vec()))?;
        let state = Value::from_array(([2usize, 1usize, 128usize], self.state.clone()))?;
        let sr = Value::from_array(([1usize], vec![SAMPLE_RATE]))?;

        let outputs = self.session.run(ort::inputs![input, state, sr])?;

        let (_prob_shape, prob_data) = outputs[0].try_extract_tensor::<f32>()?;
        let prob = prob_data.first().copied().unwrap_or(0.0);

        let (_state_shape, new_state_data) = outputs[1].try_extract_tensor::<f32>()?;
        if new_state_data.len() == self.state.len() {
            self.state.copy_from_slice(new_state_data);
        }

        Ok(prob)
    }
}

/// Convert i16 PCM samples to f32 normalized [-1.0, 1.0].
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Convert f32 normalized samples to i16 PCM.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i16_to_f32_conversion() {
        let samples = vec![0i16, 32767, -32768];
        let converted = i16_to_f32(&samples);
        assert!((converted[0] - 0.0).abs() < 0.001);
        assert!((converted[1] - 1.0).abs() < 0.001);
        assert!((converted[2] - (-1.0)).abs() < 0.001);
    }

    #[test]
    fn test_f32_to_i16_conversion() {
        let samples = vec![0.0f32, 1.0, -1.0];
        let converted = f32_to_i16(&samples);
        assert_eq!(converted[0], 0);
        assert_eq!(converted[1], 32767);
        assert_eq!(converted[2], -32767);
    }
}
