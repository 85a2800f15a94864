//! External HTTP API client: `{GET,POST,PUT,DELETE} <base_url><path>`.
//!
//! Grounded on `original_source/app/services/external_api_client.py`:
//! 30s timeout, pooled connections (handled by the registry's shared
//! `reqwest::Client`), and an `{ok:false, error}` shape on any HTTP or
//! network failure rather than propagating the error.

use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

const TIMEOUT: Duration = Duration::from_secs(30);

pub struct ExternalApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ExternalApiClient {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    pub async fn call(&self, method: &str, path: &str, payload: &Value) -> Value {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let result = self.dispatch(method, &url, payload).await;
        match result {
            Ok(body) => body,
            Err(e) => {
                warn!("external API call {method} {path} failed: {e}");
                json!({"ok": false, "error": e.to_string()})
            }
        }
    }

    async fn dispatch(&self, method: &str, url: &str, payload: &Value) -> anyhow::Result<Value> {
        let request = match method.to_uppercase().as_str() {
            "GET" => self.http.get(url),
            "POST" => self.http.post(url).json(payload),
            "PUT" => self.http.put(url).json(payload),
            "DELETE" => self.http.delete(url),
            other => anyhow::bail!("unsupported method: {other}"),
        };

        let response = request.timeout(TIMEOUT).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("HTTP {}", response.status());
        }
        Ok(response.json().await.unwrap_or(Value::Null))
    }
}
