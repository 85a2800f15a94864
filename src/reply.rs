//! C7 — Reply Pipeline: LLM call, tag parsing, KB/external-API dispatch,
//! TTS text cleanup.
//!
//! Grounded 1:1 on `original_source/app/script.py` (tag regexes),
//! `original_source/app/api/state.py::scripted_chat_default` (dispatch order:
//! API call wins over KB search, KB search wins over a direct reply), and
//! `original_source/app/utils/text_processing.py::clean_text_for_tts`.

use crate::external_api::ExternalApiClient;
use crate::kb::KbClient;
use crate::llm::{ChatMessage, LlmClient};
use crate::prompt::ScriptConfig;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct KbSource {
    pub source_path: String,
    pub filename: String,
    pub score: String,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct KbOutcome {
    pub query: String,
    pub sources: Vec<KbSource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiOutcome {
    pub method: String,
    pub path: String,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyOutcome {
    pub text: String,
    pub kb: Option<KbOutcome>,
    pub api: Option<ApiOutcome>,
}

/// Build `messages = [system] + history + [current user]` and run one LLM
/// turn, then dispatch into an API call, a KB search, or a direct reply.
pub async fn generate_reply(
    llm: &LlmClient,
    kb: &KbClient,
    external_api: &ExternalApiClient,
    script: &ScriptConfig,
    raw_script: &str,
    history: &[(&'static str, String)],
    user_content: &str,
) -> anyhow::Result<ReplyOutcome> {
    let system_prompt = crate::prompt::build_system_prompt(script, raw_script);

    let mut messages = vec![ChatMessage::system(system_prompt)];
    for (role, content) in history {
        match *role {
            "user" => messages.push(ChatMessage::user(content.clone())),
            "assistant" => messages.push(ChatMessage::assistant(content.clone())),
            _ => {}
        }
    }
    messages.push(ChatMessage::user(user_content.to_string()));

    let raw = llm.complete(&messages).await?;
    let reply = sanitize_reply(&raw);

    if let Some(api_call) = parse_api_call_tag(&reply) {
        info!(method = %api_call.method, path = %api_call.path, "API call detected");
        let path = api_call.path.strip_prefix("/api").unwrap_or(&api_call.path);
        let result = external_api.call(&api_call.method, path, &api_call.payload).await;

        let format_prompt = format!(
            "The API call was: {} {}. The API returned: {}. Formulate a friendly, human response based on the API result.",
            api_call.method, path, result
        );
        let payload_text = if let Some(s) = api_call.payload.as_str() {
            s.to_string()
        } else {
            api_call.payload.to_string()
        };
        let fm = [ChatMessage::system(format_prompt), ChatMessage::user(payload_text)];
        let final_reply = sanitize_reply(&llm.complete(&fm).await?);

        return Ok(ReplyOutcome {
            text: final_reply,
            kb: None,
            api: Some(ApiOutcome { method: api_call.method, path: path.to_string(), result }),
        });
    }

    if let Some(search_query) = parse_search_kb_tag(&reply) {
        info!(query = %search_query, "KB search detected");
        let hits = kb.search("default", &search_query).await.unwrap_or_else(|e| {
            warn!("KB search failed: {e}");
            Vec::new()
        });
        let rag_answer = hits.iter().map(|h| h.doc.page_content.as_str()).collect::<Vec<_>>().join("\n");

        let format_prompt = format!(
            "The user asked: '{search_query}'. The knowledge base found: '{rag_answer}'. \
             IMPORTANT: The information above came from the knowledge base, NOT from what the user said. \
             The user did NOT mention or provide this information. \
             Formulate a friendly, human response that presents this information as something you found or looked up, \
             not as something the user told you. Use phrases like 'I found', 'According to our records', \
             'Our knowledge base shows', or 'I can see that' instead of 'you have', 'you mentioned', or 'you said'. \
             Never attribute knowledge base information to the user."
        );
        let fm = [ChatMessage::system(format_prompt), ChatMessage::user(user_content.to_string())];
        let final_reply = sanitize_reply(&llm.complete(&fm).await?);

        let sources = hits
            .iter()
            .map(|h| {
                let source_path = h.doc.metadata.source_path.clone();
                let filename = std::path::Path::new(&source_path)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "(unknown)".to_string());
                let preview: String = h.doc.page_content.chars().take(200).collect();
                KbSource { source_path, filename, score: format!("{:.4}", h.score), preview }
            })
            .collect();

        return Ok(ReplyOutcome {
            text: final_reply,
            kb: Some(KbOutcome { query: search_query, sources }),
            api: None,
        });
    }

    Ok(ReplyOutcome { text: reply, kb: None, api: None })
}

fn sanitize_reply(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>\s*").unwrap());
    re.replace_all(text, "").trim().to_string()
}

fn parse_search_kb_tag(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?s)\[SEARCH_KB:\s*'(.*?)'\s*\]").unwrap());
    re.captures(text).map(|c| c[1].to_string())
}

struct ApiCallTag {
    method: String,
    path: String,
    payload: Value,
}

fn parse_api_call_tag(text: &str) -> Option<ApiCallTag> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?s)\[API_CALL:\s*'([A-Z]+)\s+([^']+)'\s*(?:,\s*(\{.*?\}))?\s*\]").unwrap()
    });
    let caps = re.captures(text)?;
    let method = caps[1].trim().to_string();
    let path = caps[2].trim().to_string();
    let payload = caps
        .get(3)
        .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        .unwrap_or_else(|| Value::Object(Default::default()));
    Some(ApiCallTag { method, path, payload })
}

struct TtsRegexes {
    bold: Regex,
    italic: Regex,
    bold_underscore: Regex,
    italic_underscore: Regex,
    bullet_start: Regex,
    bullet_mid: Regex,
    heading: Regex,
    link: Regex,
    code_block: Regex,
    inline_code: Regex,
    newlines: Regex,
    spaces: Regex,
}

fn tts_regexes() -> &'static TtsRegexes {
    static RE: OnceLock<TtsRegexes> = OnceLock::new();
    RE.get_or_init(|| TtsRegexes {
        bold: Regex::new(r"\*\*([^*]+)\*\*").unwrap(),
        italic: Regex::new(r"\*([^*]+)\*").unwrap(),
        bold_underscore: Regex::new(r"__([^_]+)__").unwrap(),
        italic_underscore: Regex::new(r"_([^_]+)_").unwrap(),
        bullet_start: Regex::new(r"(?m)^\s*\*\s+").unwrap(),
        bullet_mid: Regex::new(r"\s*\*\s+").unwrap(),
        heading: Regex::new(r"(?m)^#+\s+").unwrap(),
        link: Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap(),
        code_block: Regex::new(r"(?s)```.*?```").unwrap(),
        inline_code: Regex::new(r"`([^`]+)`").unwrap(),
        newlines: Regex::new(r"\n+").unwrap(),
        spaces: Regex::new(r"\s+").unwrap(),
    })
}

/// Strip markdown formatting that a TTS engine would otherwise read aloud.
pub fn clean_text_for_tts(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let re = tts_regexes();
    let mut t = text.to_string();
    t = re.bold.replace_all(&t, "$1").into_owned();
    t = re.italic.replace_all(&t, "$1").into_owned();
    t = re.bold_underscore.replace_all(&t, "$1").into_owned();
    t = re.italic_underscore.replace_all(&t, "$1").into_owned();

    t = re.bullet_start.replace_all(&t, "").into_owned();
    t = re.bullet_mid.replace_all(&t, " ").into_owned();

    t = re.heading.replace_all(&t, "").into_owned();
    t = re.link.replace_all(&t, "$1").into_owned();

    t = re.code_block.replace_all(&t, "").into_owned();
    t = re.inline_code.replace_all(&t, "$1").into_owned();

    t = re.newlines.replace_all(&t, " ").into_owned();
    t = re.spaces.replace_all(&t, " ").into_owned();

    t.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_reply_strips_think_block() {
        let out = sanitize_reply("<think>internal</think>Hello there");
        assert_eq!(out, "Hello there");
    }

    #[test]
    fn parse_search_kb_tag_extracts_query() {
        let out = parse_search_kb_tag("[SEARCH_KB: 'refund policy']");
        assert_eq!(out, Some("refund policy".to_string()));
    }

    #[test]
    fn parse_api_call_tag_extracts_method_path_and_payload() {
        let tag = parse_api_call_tag("[API_CALL: 'POST /api/orders', {\"id\": 5}]").unwrap();
        assert_eq!(tag.method, "POST");
        assert_eq!(tag.path, "/api/orders");
        assert_eq!(tag.payload, serde_json::json!({"id": 5}));
    }

    #[test]
    fn parse_api_call_tag_defaults_payload_on_malformed_json() {
        let tag = parse_api_call_tag("[API_CALL: 'GET /api/ping', {not json}]").unwrap();
        assert_eq!(tag.payload, serde_json::json!({}));
    }

    #[test]
    fn clean_text_for_tts_strips_markdown() {
        let out = clean_text_for_tts("**bold** and [a link](http://x) and `code`");
        assert_eq!(out, "bold and link and code");
    }

    #[test]
    fn clean_text_for_tts_handles_empty_input() {
        assert_eq!(clean_text_for_tts(""), "");
    }
}
