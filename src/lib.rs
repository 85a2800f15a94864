//! Turnkeeper - real-time, full-duplex-over-websocket voice agent.
//!
//! Browser microphone stream -> buffered/segmented speech -> ASR -> LLM reply
//! (optionally grounded by a knowledge base or an external API) -> TTS, under
//! a half-duplex "barge-in-safe" turn-taking policy.

pub mod cli;
pub mod config;
pub mod error;
pub mod external_api;
pub mod kb;
pub mod llm;
pub mod prompt;
pub mod registry;
pub mod reply;
pub mod server;
pub mod turn;
pub mod voice;

pub use config::Config;
pub use error::{AgentError, AgentResult};
pub use server::{start, ServerState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

pub fn info() -> String {
    format!("{} v{} - real-time voice agent", NAME, VERSION)
}
