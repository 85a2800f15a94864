//! C5 — Turn Manager: session registry, safe for concurrent access across
//! sessions.
//!
//! Grounded on `original_source/voice/service/voice_session.py::VoiceSessionManager`
//! for the registry shape and the teacher's `ServerState` for the shared
//! `Arc<..>` idiom.

use crate::config::VoiceConfig;
use crate::turn::session::TurnSession;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct TurnManager {
    storage_dir: PathBuf,
    voice: VoiceConfig,
    sessions: Mutex<HashMap<String, Arc<Mutex<TurnSession>>>>,
}

impl TurnManager {
    pub fn new(storage_dir: PathBuf, voice: VoiceConfig) -> Self {
        Self { storage_dir, voice, sessions: Mutex::new(HashMap::new()) }
    }

    pub async fn start(&self, session_id: &str) -> Arc<Mutex<TurnSession>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                let dir = self.storage_dir.join(session_id);
                Arc::new(Mutex::new(TurnSession::new(session_id.to_string(), dir, self.voice.clone())))
            })
            .clone()
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Mutex<TurnSession>>> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    pub async fn clear_processing_flag(&self, session_id: &str) {
        if let Some(session) = self.get(session_id).await {
            session.lock().await.clear_processing_flag();
        }
    }

    pub async fn remove(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_is_idempotent_per_session_id() {
        let manager = TurnManager::new(PathBuf::from("/tmp/turnkeeper-test-mgr"), VoiceConfig::default());
        let a = manager.start("s1").await;
        let b = manager.start("s1").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn remove_drops_the_session() {
        let manager = TurnManager::new(PathBuf::from("/tmp/turnkeeper-test-mgr2"), VoiceConfig::default());
        manager.start("s1").await;
        manager.remove("s1").await;
        assert!(manager.get("s1").await.is_none());
    }
}
