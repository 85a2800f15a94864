//! Typed error taxonomy for the turn pipeline.
//!
//! Call sites that need to branch on *kind* of failure (retry vs. drop-the-cycle
//! vs. surface-to-client) match on [`AgentError`]; everything else (CLI, `main`,
//! fire-and-forget task bodies) uses `anyhow::Result` and just logs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// DNS/connect/timeout failures talking to the LLM, KB, or external API. Retryable.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// The transcoder process exited nonzero or produced no output. The caller should
    /// skip this decode cycle and keep buffering, not tear down the session.
    #[error("media decode failed: {0}")]
    MediaDecode(String),

    /// ASR/VAD/TTS failed to load or run. The current turn fails with an `error` frame;
    /// the session stays alive.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// A frame could not be parsed as the expected protocol message. Logged and ignored.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transport closed. Not a real error — callers treat this as a clean loop exit.
    #[error("transport closed")]
    TransportClosed,
}

impl AgentError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::TransientNetwork(_))
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
