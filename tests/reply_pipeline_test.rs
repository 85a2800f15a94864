//! End-to-end coverage of the reply pipeline's dispatch order (§4.7): an
//! `[API_CALL: ...]` tag wins over a `[SEARCH_KB: ...]` tag, which wins over
//! a direct reply. Each collaborator (LLM, KB, external API) is a real HTTP
//! server on loopback so the clients' request/response wiring is exercised,
//! not just the tag-parsing regexes already covered in `src/reply.rs`.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use turnkeeper::config::{KbConfig, LlmConfig};
use turnkeeper::external_api::ExternalApiClient;
use turnkeeper::kb::KbClient;
use turnkeeper::llm::LlmClient;
use turnkeeper::prompt::ScriptConfig;
use turnkeeper::reply::generate_reply;

/// A canned-response chat-completions endpoint: pops one string per call.
async fn spawn_llm_mock(replies: Vec<&'static str>) -> String {
    let queue = Arc::new(Mutex::new(replies.into_iter().collect::<VecDeque<_>>()));

    async fn handler(State(queue): State<Arc<Mutex<VecDeque<&'static str>>>>) -> Json<Value> {
        let content = queue.lock().await.pop_front().unwrap_or("");
        Json(json!({"choices": [{"message": {"content": content}}]}))
    }

    let app = Router::new().route("/chat/completions", post(handler)).with_state(queue);
    bind_and_serve(app).await
}

async fn spawn_kb_mock(hits_json: Value) -> String {
    async fn handler(State(hits): State<Value>) -> Json<Value> {
        Json(hits)
    }
    let app = Router::new().route("/search", get(handler)).with_state(hits_json);
    bind_and_serve(app).await
}

async fn spawn_external_api_mock(expected_path: &'static str, response: Value) -> String {
    async fn handler(State(response): State<Value>) -> Json<Value> {
        Json(response)
    }
    let app = Router::new().route(expected_path, get(handler)).with_state(response);
    bind_and_serve(app).await
}

async fn bind_and_serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn llm_client(base_url: String) -> LlmClient {
    LlmClient::new(
        reqwest::Client::new(),
        "test-key".to_string(),
        &LlmConfig { api_key: None, model: "test-model".into(), base_url, timeout_s: 5 },
    )
}

#[tokio::test]
async fn kb_tag_dispatches_to_kb_search_and_attributes_sources() {
    let llm_addr = spawn_llm_mock(vec![
        "[SEARCH_KB: 'refund policy']",
        "I found our refund policy: refunds are processed within 5 business days.",
    ])
    .await;
    let kb_addr = spawn_kb_mock(json!([
        {"doc": {"page_content": "Refunds are processed within 5 business days.", "metadata": {"source_path": "docs/refunds.md"}}, "score": 0.91}
    ]))
    .await;

    let llm = llm_client(llm_addr);
    let kb = KbClient::new(reqwest::Client::new(), KbConfig { base_url: kb_addr, ..KbConfig::default() });
    let external_api = ExternalApiClient::new(reqwest::Client::new(), String::new());

    let outcome = generate_reply(
        &llm,
        &kb,
        &external_api,
        &ScriptConfig::default(),
        "",
        &[],
        "Do you have a refund policy?",
    )
    .await
    .expect("reply pipeline");

    assert!(outcome.api.is_none());
    let kb_outcome = outcome.kb.expect("kb outcome present");
    assert_eq!(kb_outcome.query, "refund policy");
    assert_eq!(kb_outcome.sources.len(), 1);
    assert_eq!(kb_outcome.sources[0].filename, "refunds.md");
    assert_eq!(kb_outcome.sources[0].score, "0.9100");
    assert!(outcome.text.contains("refund policy"));
}

#[tokio::test]
async fn api_call_tag_dispatches_to_external_api_and_strips_api_prefix() {
    let llm_addr = spawn_llm_mock(vec![
        "[API_CALL: 'GET /api/orders/5']",
        "Your order has shipped!",
    ])
    .await;
    let api_addr = spawn_external_api_mock("/orders/5", json!({"status": "shipped"})).await;

    let llm = llm_client(llm_addr);
    let kb = KbClient::new(reqwest::Client::new(), KbConfig::default());
    let external_api = ExternalApiClient::new(reqwest::Client::new(), api_addr);

    let outcome = generate_reply(
        &llm,
        &kb,
        &external_api,
        &ScriptConfig::default(),
        "",
        &[],
        "What's the status of order 5?",
    )
    .await
    .expect("reply pipeline");

    let api_outcome = outcome.api.expect("api outcome present");
    assert_eq!(api_outcome.method, "GET");
    assert_eq!(api_outcome.path, "/orders/5");
    assert_eq!(api_outcome.result, json!({"status": "shipped"}));
    assert!(outcome.kb.is_none());
    assert_eq!(outcome.text, "Your order has shipped!");
}

#[tokio::test]
async fn direct_reply_when_no_tag_is_present() {
    let llm_addr = spawn_llm_mock(vec!["Sure, I can help with that."]).await;
    let kb = KbClient::new(reqwest::Client::new(), KbConfig::default());
    let external_api = ExternalApiClient::new(reqwest::Client::new(), String::new());

    let outcome = generate_reply(
        &llm_client(llm_addr),
        &kb,
        &external_api,
        &ScriptConfig::default(),
        "",
        &[],
        "Hello!",
    )
    .await
    .expect("reply pipeline");

    assert_eq!(outcome.text, "Sure, I can help with that.");
    assert!(outcome.kb.is_none());
    assert!(outcome.api.is_none());
}
