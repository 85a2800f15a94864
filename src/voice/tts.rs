//! TTS client: `synthesize(voice_model, text, out_path, use_cuda) -> bool`.
//!
//! Grounded directly on `original_source/voice/tts/piper_runner.py`'s
//! `synthesize_wav_api` contract (returns a bool, never propagates the
//! underlying error to the caller — a failed synth is "no audio", not a
//! crash). Implemented against a `piper`-compatible CLI binary rather than an
//! in-process model, matching the Transcoder's subprocess-per-call idiom.

use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct TtsClient {
    pub bin: String,
}

impl TtsClient {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// Synthesize `text` to a WAV file at `out_path`. Returns `true` only if
    /// the process exited cleanly and produced a non-empty file; any failure
    /// (missing binary, bad voice model, empty output) is logged and folded
    /// into `false` so callers can treat TTS failure as "no audio, still
    /// deliver the text reply" per §7.
    pub async fn synthesize(&self, voice_model: &str, text: &str, out_path: &Path, use_cuda: bool) -> bool {
        match self.run(voice_model, text, out_path, use_cuda).await {
            Ok(()) => {
                matches!(tokio::fs::metadata(out_path).await, Ok(meta) if meta.len() > 0)
            }
            Err(e) => {
                warn!("TTS synthesis failed: {e}");
                false
            }
        }
    }

    async fn run(&self, voice_model: &str, text: &str, out_path: &Path, use_cuda: bool) -> anyhow::Result<()> {
        let mut args = vec![
            "--model".to_string(),
            voice_model.to_string(),
            "--output_file".to_string(),
            out_path.to_string_lossy().to_string(),
        ];
        if use_cuda {
            args.push("--cuda".to_string());
        }

        let mut child = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "piper exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructs_with_configured_binary() {
        let client = TtsClient::new("piper");
        assert_eq!(client.bin, "piper");
    }
}
