//! C8 — Prompt Assembler: `ScriptConfig` loading (mtime-cached) and system
//! prompt composition.
//!
//! Grounded on `original_source/app/api/state.py::_load_default_script`
//! (double-checked `(path, mtime)` cache under a mutex) and its
//! `/scripted_chat` handler's exact concatenation order.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScriptConfig {
    #[serde(default)]
    pub rag_context: RagContext,
    #[serde(default)]
    pub api_endpoints: Vec<ApiEndpoint>,
    pub intro_text: Option<String>,
    pub grounding_rules: Option<String>,
    pub kb_instructions: Option<String>,
    pub api_instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RagContext {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub documents: Vec<DocEntry>,
    pub description: Option<String>,
}

/// Documents may be listed as bare filename strings (legacy) or as
/// `{filename, doc_id}` objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocEntry {
    Legacy(String),
    Full { filename: String, doc_id: Option<String> },
}

impl DocEntry {
    pub fn filename(&self) -> &str {
        match self {
            DocEntry::Legacy(name) => name,
            DocEntry::Full { filename, .. } => filename,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEndpoint {
    pub method: String,
    pub path: String,
    pub description: String,
    #[serde(default)]
    pub payload_schema: Option<serde_json::Value>,
}

struct CachedScript {
    path: PathBuf,
    mtime: SystemTime,
    config: ScriptConfig,
    raw: String,
}

static CACHE: Mutex<Option<CachedScript>> = Mutex::new(None);

/// Load `{path}.json` (ScriptConfig) and the sibling raw script text file,
/// reusing the cached copy unless the file's mtime has changed.
pub fn load_script(config_path: &Path, raw_script_path: &Path) -> anyhow::Result<(ScriptConfig, String)> {
    let mtime = std::fs::metadata(config_path)?.modified()?;

    {
        let cache = CACHE.lock().unwrap();
        if let Some(cached) = cache.as_ref() {
            if cached.path == config_path && cached.mtime == mtime {
                return Ok((cached.config.clone(), cached.raw.clone()));
            }
        }
    }

    debug!(path = %config_path.display(), "reloading script config (mtime changed)");
    let raw_json = std::fs::read_to_string(config_path)?;
    let parsed: ScriptConfig = serde_json::from_str(&raw_json)?;
    let raw_script = std::fs::read_to_string(raw_script_path).unwrap_or_default();

    let mut cache = CACHE.lock().unwrap();
    *cache = Some(CachedScript {
        path: config_path.to_path_buf(),
        mtime,
        config: parsed.clone(),
        raw: raw_script.clone(),
    });

    Ok((parsed, raw_script))
}

/// Compose the system prompt: intro, documents, API endpoints, grounding
/// rules, KB/API instructions, then a `--RAW` delimiter and the raw script.
pub fn build_system_prompt(config: &ScriptConfig, raw_script: &str) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(intro) = &config.intro_text {
        parts.push(intro.clone());
    }

    if config.rag_context.enabled && !config.rag_context.documents.is_empty() {
        let mut block = String::from("Documents available:\n");
        for doc in &config.rag_context.documents {
            block.push_str(&format!("- {}\n", doc.filename()));
        }
        parts.push(block.trim_end().to_string());
    }

    if !config.api_endpoints.is_empty() {
        let mut block = String::from("API endpoints available:\n");
        for ep in &config.api_endpoints {
            let schema = ep
                .payload_schema
                .as_ref()
                .map(|s| serde_json::to_string(s).unwrap_or_default())
                .unwrap_or_default();
            block.push_str(&format!("- {} {}: {} {}\n", ep.method, ep.path, ep.description, schema));
        }
        parts.push(block.trim_end().to_string());
    }

    if let Some(rules) = &config.grounding_rules {
        parts.push(rules.clone());
    }
    if let Some(kb) = &config.kb_instructions {
        parts.push(kb.clone());
    }
    if let Some(api) = &config.api_instructions {
        parts.push(api.clone());
    }

    parts.push("--RAW".to_string());
    parts.push(raw_script.to_string());

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_entry_filename_handles_both_shapes() {
        let legacy = DocEntry::Legacy("a.md".to_string());
        let full = DocEntry::Full { filename: "b.md".to_string(), doc_id: Some("1".to_string()) };
        assert_eq!(legacy.filename(), "a.md");
        assert_eq!(full.filename(), "b.md");
    }

    #[test]
    fn build_system_prompt_ends_with_raw_delimiter_and_script() {
        let config = ScriptConfig {
            intro_text: Some("Hello.".to_string()),
            ..Default::default()
        };
        let prompt = build_system_prompt(&config, "raw script text");
        assert!(prompt.starts_with("Hello."));
        assert!(prompt.ends_with("raw script text"));
        assert!(prompt.contains("--RAW"));
    }

    #[test]
    fn documents_block_only_appears_when_enabled() {
        let mut config = ScriptConfig::default();
        config.rag_context.enabled = false;
        config.rag_context.documents = vec![DocEntry::Legacy("x.md".to_string())];
        let prompt = build_system_prompt(&config, "");
        assert!(!prompt.contains("Documents available"));

        config.rag_context.enabled = true;
        let prompt = build_system_prompt(&config, "");
        assert!(prompt.contains("Documents available"));
        assert!(prompt.contains("x.md"));
    }
}
