//! C1 — Model Registry: lazy, thread-safe singletons for ASR, VAD, LLM
//! client, and pooled HTTP client.
//!
//! Grounded on `src/skills/mod.rs`'s `OnceLock::get_or_init` singleton idiom
//! and `original_source/voice/service/shared_session.py`'s `_detect_cuda()`
//! probe order (explicit env override, then runtime capability check, then
//! CPU fallback). Once a singleton is set, the reference is stable for
//! process lifetime; a failed first attempt is not cached, so a later call
//! may retry (§4.1).

use crate::config::VoiceConfig;
use crate::voice::asr::AsrClient;
use crate::voice::silero_vad::SileroSession;
use std::sync::{Mutex, OnceLock};
use tracing::{info, warn};

static LLM_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
static VAD_SESSION: OnceLock<Mutex<SileroSession>> = OnceLock::new();
static CUDA_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Pooled HTTP client shared by the LLM, KB, and external-API clients.
/// Mirrors `original_source/app/services/external_api_client.py`'s
/// `httpx.Limits(max_keepalive_connections=10, max_connections=20)`.
pub fn get_http_client() -> &'static reqwest::Client {
    LLM_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build shared HTTP client")
    })
}

/// Lazily load the Silero VAD ONNX session. Failures are logged and
/// surfaced as `None` rather than cached, so a transient download failure
/// can be retried on the next call that needs VAD.
pub fn get_vad() -> Option<&'static Mutex<SileroSession>> {
    if let Some(existing) = VAD_SESSION.get() {
        return Some(existing);
    }
    match SileroSession::load() {
        Ok(session) => Some(VAD_SESSION.get_or_init(|| Mutex::new(session))),
        Err(e) => {
            warn!("failed to load Silero VAD model: {e}");
            None
        }
    }
}

pub fn get_asr(voice: &VoiceConfig) -> AsrClient {
    let (device, compute) = resolved_asr_device_and_compute(voice);
    AsrClient::new(voice.stt_script_path.clone(), voice.asr_model.clone(), device, compute)
}

/// §4.1: device and precision are resolved together — CUDA pairs with
/// `float16`, CPU with `int8`. An explicit (non-"auto") `asr_device`
/// override keeps the configured `asr_compute` as-is.
fn resolved_asr_device_and_compute(voice: &VoiceConfig) -> (String, String) {
    if voice.asr_device != "auto" {
        return (voice.asr_device.clone(), voice.asr_compute.clone());
    }
    if cuda_available(voice) {
        ("cuda".to_string(), "float16".to_string())
    } else {
        ("cpu".to_string(), "int8".to_string())
    }
}

/// Device selection per §4.1: prefer CUDA if available, else CPU. The probe
/// result is cached for the process lifetime — it is not re-run per call.
pub fn cuda_available(voice: &VoiceConfig) -> bool {
    if let Some(v) = voice.use_cuda {
        return v;
    }
    *CUDA_AVAILABLE.get_or_init(probe_cuda)
}

/// §4.1/§6: client configuration for the embeddings model, kept on the
/// registry for interface completeness. The KB itself is an opaque external
/// HTTP collaborator (§1, §6, `src/kb.rs`) — nothing in this crate loads an
/// embedding model or a vector store locally.
pub struct EmbeddingsClient {
    pub model: String,
}

pub fn get_embeddings(model: &str) -> EmbeddingsClient {
    EmbeddingsClient { model: model.to_string() }
}

fn probe_cuda() -> bool {
    // No explicit USE_CUDA override: fall back to a cheap runtime signal
    // rather than guessing at driver internals. `nvidia-smi` on PATH is the
    // same signal the ASR/TTS subprocesses' own CUDA auto-detection uses.
    let available = std::process::Command::new("nvidia-smi")
        .arg("-L")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false);

    if available {
        info!("nvidia-smi reports a GPU: enabling CUDA");
    } else {
        info!("no GPU detected, using CPU");
    }
    available
}
