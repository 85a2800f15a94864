//! Configuration management.
//!
//! Layered: a typed tree with `#[serde(default = "fn")]` on every field, loaded
//! from an optional TOML file (`VOICE_AGENT_CONFIG`, defaulting to
//! `turnkeeper.toml` in the current directory if present) and then overridden
//! by the environment variables listed in `SPEC_FULL.md` §6.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub kb: KbConfig,
    #[serde(default)]
    pub external_api: ExternalApiConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load from `VOICE_AGENT_CONFIG` (or `turnkeeper.toml` if present), then
    /// apply environment overrides. Never fails on a missing file — falls
    /// back to defaults, matching the teacher's zero-config-friendly posture.
    pub fn load() -> Result<Self> {
        let path = std::env::var("VOICE_AGENT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("turnkeeper.toml"));

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TOGETHER_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("TOGETHER_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("TOGETHER_TIMEOUT") {
            if let Ok(secs) = v.parse() {
                self.llm.timeout_s = secs;
            }
        }
        if let Ok(v) = std::env::var("WHISPER_MODEL") {
            self.voice.asr_model = v;
        }
        if let Ok(v) = std::env::var("PIPER_VOICE") {
            self.voice.tts_voice = v;
        }
        if let Ok(v) = std::env::var("FFMPEG_BIN") {
            self.voice.ffmpeg_bin = v;
        }
        if let Ok(v) = std::env::var("USE_CUDA") {
            self.voice.use_cuda = match v.to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None, // "auto" or anything else: let the registry probe.
            };
        }
        if let Ok(v) = std::env::var("EXTERNAL_API_BASE_URL").or_else(|_| std::env::var("API_BASE_URL")) {
            self.external_api.base_url = v;
        }
        if let Ok(v) = std::env::var("CHROMA_DIR") {
            self.kb.base_url = v;
        }
        if let Ok(v) = std::env::var("EMBEDDINGS_MODEL") {
            self.kb.embeddings_model = v;
        }
        if let Ok(v) = std::env::var("KB_TOP_K") {
            if let Ok(n) = v.parse() {
                self.kb.top_k = n;
            }
        }
        if let Ok(v) = std::env::var("KB_SCORE_MODE") {
            self.kb.score_mode = match v.as_str() {
                "distance" => ScoreMode::Distance,
                _ => ScoreMode::Similarity,
            };
        }
        if let Ok(v) = std::env::var("KB_SCORE_THRESHOLD") {
            if let Ok(t) = v.parse() {
                self.kb.score_threshold = t;
            }
        }
        if let Ok(v) = std::env::var("VOICE_AGENT_STORAGE_DIR") {
            self.server.storage_dir = PathBuf::from(v);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Usually left unset here and resolved via env var at load time.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_timeout_s")]
    pub timeout_s: u64,
}

fn default_llm_model() -> String {
    "meta-llama/Llama-3.3-70B-Instruct-Turbo".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.together.xyz/v1".to_string()
}
fn default_llm_timeout_s() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            timeout_s: default_llm_timeout_s(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMode {
    Similarity,
    Distance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_asr_model")]
    pub asr_model: String,
    #[serde(default = "default_asr_device")]
    pub asr_device: String,
    #[serde(default = "default_asr_compute")]
    pub asr_compute: String,
    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    /// `None` means "auto-probe"; `Some` is an explicit override from `USE_CUDA`.
    #[serde(default)]
    pub use_cuda: Option<bool>,
    #[serde(default = "default_vad_threshold")]
    pub vad_threshold: f32,
    #[serde(default = "default_vad_min_speech_ms")]
    pub vad_min_speech_ms: u64,
    #[serde(default = "default_vad_min_silence_ms")]
    pub vad_min_silence_ms: u64,
    #[serde(default = "default_stt_script")]
    pub stt_script_path: String,
    #[serde(default = "default_tts_bin")]
    pub tts_bin: String,
}

fn default_asr_model() -> String {
    "base".to_string()
}
fn default_asr_device() -> String {
    "auto".to_string()
}
fn default_asr_compute() -> String {
    "int8".to_string()
}
fn default_tts_voice() -> String {
    String::new()
}
fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}
fn default_vad_threshold() -> f32 {
    0.3
}
fn default_vad_min_speech_ms() -> u64 {
    100
}
fn default_vad_min_silence_ms() -> u64 {
    800
}
fn default_stt_script() -> String {
    "scripts/whisper_transcribe.py".to_string()
}
fn default_tts_bin() -> String {
    "piper".to_string()
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            asr_model: default_asr_model(),
            asr_device: default_asr_device(),
            asr_compute: default_asr_compute(),
            tts_voice: default_tts_voice(),
            ffmpeg_bin: default_ffmpeg_bin(),
            use_cuda: None,
            vad_threshold: default_vad_threshold(),
            vad_min_speech_ms: default_vad_min_speech_ms(),
            vad_min_silence_ms: default_vad_min_silence_ms(),
            stt_script_path: default_stt_script(),
            tts_bin: default_tts_bin(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbConfig {
    #[serde(default = "default_kb_base_url")]
    pub base_url: String,
    #[serde(default = "default_kb_top_k")]
    pub top_k: usize,
    #[serde(default = "default_kb_score_mode")]
    pub score_mode: ScoreMode,
    #[serde(default = "default_kb_score_threshold")]
    pub score_threshold: f64,
    /// Passed to the registry's `get_embeddings` accessor (§4.1); the KB
    /// itself stays an opaque external HTTP collaborator either way.
    #[serde(default = "default_embeddings_model")]
    pub embeddings_model: String,
}

fn default_kb_base_url() -> String {
    String::new()
}
fn default_kb_top_k() -> usize {
    4
}
fn default_kb_score_mode() -> ScoreMode {
    ScoreMode::Similarity
}
fn default_kb_score_threshold() -> f64 {
    0.25
}
fn default_embeddings_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

impl Default for KbConfig {
    fn default() -> Self {
        Self {
            base_url: default_kb_base_url(),
            top_k: default_kb_top_k(),
            score_mode: default_kb_score_mode(),
            score_threshold: default_kb_score_threshold(),
            embeddings_model: default_embeddings_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalApiConfig {
    #[serde(default = "default_external_api_base_url")]
    pub base_url: String,
}

fn default_external_api_base_url() -> String {
    String::new()
}

impl Default for ExternalApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_external_api_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_storage_dir() -> PathBuf {
    PathBuf::from("storage/voice")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            storage_dir: default_storage_dir(),
        }
    }
}

/// Directory for cached/downloaded models (e.g. the Silero VAD ONNX file).
pub fn data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(dirs::home_dir)
        .context("could not resolve a data directory")?;
    let dir = base.join("turnkeeper");
    std::fs::create_dir_all(&dir).context("creating data directory")?;
    Ok(dir)
}
