//! ASR client: `transcribe(wav_bytes, device, compute, vad_filter=true) -> text`.
//!
//! Grounded on the teacher's `stt_local.rs` (subprocess-per-call shape, base64
//! stdin, JSON stdout) and `original_source/voice/asr/whisper_runner.py`
//! (faster-whisper parameters: `vad_filter`, `min_silence_duration_ms=500`,
//! `beam_size=5`). The Model Registry singleton for ASR is this client's
//! configuration, not an in-process model — the actual decode happens in the
//! external Python helper, matching the subprocess-per-call contract of §6.

use base64::Engine;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

const ASR_TIMEOUT: Duration = Duration::from_secs(300); // safety cap, §5
const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct AsrClient {
    pub script_path: String,
    pub model: String,
    pub device: String,
    pub compute: String,
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    error: Option<String>,
}

impl AsrClient {
    pub fn new(script_path: impl Into<String>, model: impl Into<String>, device: impl Into<String>, compute: impl Into<String>) -> Self {
        Self {
            script_path: script_path.into(),
            model: model.into(),
            device: device.into(),
            compute: compute.into(),
        }
    }

    /// Transcribe 16 kHz mono PCM16 WAV bytes, retrying once on failure.
    pub async fn transcribe(&self, wav_bytes: &[u8]) -> anyhow::Result<String> {
        match self.run_once(wav_bytes).await {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!("ASR attempt 1 failed ({e}), retrying once");
                tokio::time::sleep(RETRY_DELAY).await;
                self.run_once(wav_bytes).await
            }
        }
    }

    async fn run_once(&self, wav_bytes: &[u8]) -> anyhow::Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(wav_bytes);

        let mut child = Command::new("python3")
            .arg(&self.script_path)
            .arg("-")
            .arg(&self.model)
            .arg(&self.device)
            .arg(&self.compute)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(encoded.as_bytes()).await?;
        }

        let output = tokio::time::timeout(ASR_TIMEOUT, child.wait_with_output()).await??;
        if !output.status.success() {
            anyhow::bail!(
                "whisper helper exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let parsed: WhisperResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| anyhow::anyhow!("malformed whisper helper output: {e}"))?;
        if let Some(err) = parsed.error {
            anyhow::bail!("whisper helper reported error: {err}");
        }
        Ok(parsed.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructs_with_expected_fields() {
        let client = AsrClient::new("scripts/whisper_transcribe.py", "base", "cpu", "int8");
        assert_eq!(client.model, "base");
        assert_eq!(client.device, "cpu");
    }
}
