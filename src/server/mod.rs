//! HTTP/WS server: wires the Turn Manager, LLM/KB/external-API clients, and
//! the signaling loop behind an axum `Router`.

pub mod http;
pub mod signaling;

use crate::config::{Config, VoiceConfig};
use crate::external_api::ExternalApiClient;
use crate::kb::KbClient;
use crate::llm::LlmClient;
use crate::turn::manager::TurnManager;
use anyhow::Result;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct ServerState {
    pub turns: Arc<TurnManager>,
    pub llm: Arc<LlmClient>,
    pub kb: Arc<KbClient>,
    pub external_api: Arc<ExternalApiClient>,
    pub voice_config: Arc<VoiceConfig>,
    pub storage_dir: PathBuf,
    pub script_config_path: PathBuf,
    pub raw_script_path: PathBuf,
}

/// Assemble `ServerState` for `config`, without binding a listener.
pub fn build_state(config: &Config) -> Result<ServerState> {
    std::fs::create_dir_all(&config.server.storage_dir)?;

    let http_client = crate::registry::get_http_client().clone();
    let api_key = config.llm.api_key.clone().unwrap_or_default();

    Ok(ServerState {
        turns: Arc::new(TurnManager::new(config.server.storage_dir.clone(), config.voice.clone())),
        llm: Arc::new(LlmClient::new(http_client.clone(), api_key, &config.llm)),
        kb: Arc::new(KbClient::new(http_client.clone(), config.kb.clone())),
        external_api: Arc::new(ExternalApiClient::new(http_client, config.external_api.base_url.clone())),
        voice_config: Arc::new(config.voice.clone()),
        storage_dir: config.server.storage_dir.clone(),
        script_config_path: PathBuf::from("configs/script.json"),
        raw_script_path: PathBuf::from("simpleScript.txt"),
    })
}

/// Build the routed app for a given state. Kept separate from `start` so
/// integration tests can drive the router without binding a real listener.
pub fn build_app(state: ServerState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/voice/webrtc/{session_id}", get(signaling::ws_handler))
        .route("/api/voice/audio/{session_id}", get(http::audio_handler))
        .route("/healthz", get(http::healthz_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build server state and serve `host:port` until the process is killed.
pub async fn start(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = build_state(&config)?;
    let app = build_app(state);

    info!(%addr, "turnkeeper listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
