//! KB search client: an opaque `search(tenant, query) -> [{doc, score}]`
//! collaborator (§1, §6). Internals (embeddings, vector store, chunking) are
//! out of scope; this module only applies the threshold/fallback policy that
//! sits in front of whatever store answers the query.
//!
//! Grounded on `original_source/app/rag.py::search_with_threshold`.

use crate::config::{KbConfig, ScoreMode};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct KbDoc {
    pub page_content: String,
    pub metadata: KbMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KbMetadata {
    pub source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KbHit {
    pub doc: KbDoc,
    pub score: f64,
}

pub struct KbClient {
    http: reqwest::Client,
    config: KbConfig,
}

impl KbClient {
    pub fn new(http: reqwest::Client, config: KbConfig) -> Self {
        Self { http, config }
    }

    /// Returns an empty vec if the KB has nothing above threshold for this
    /// query *and* the raw result set was empty too — otherwise falls back to
    /// the single best hit with a warning, per the threshold policy in §6.
    pub async fn search(&self, tenant: &str, query: &str) -> anyhow::Result<Vec<KbHit>> {
        if self.config.base_url.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        let raw: Vec<KbHit> = self
            .http
            .get(&url)
            .query(&[("tenant", tenant), ("query", query), ("top_k", &self.config.top_k.to_string())])
            .send()
            .await?
            .json()
            .await?;

        Ok(apply_threshold(raw, &self.config))
    }
}

fn apply_threshold(mut hits: Vec<KbHit>, config: &KbConfig) -> Vec<KbHit> {
    if hits.is_empty() {
        return hits;
    }

    // Trust the vector store's native (best-first) ordering — do not re-sort,
    // since "best" means ascending score in distance mode and descending in
    // similarity mode.
    let kept: Vec<KbHit> = hits
        .iter()
        .cloned()
        .filter(|h| match config.score_mode {
            ScoreMode::Similarity => h.score >= config.score_threshold,
            ScoreMode::Distance => h.score <= config.score_threshold,
        })
        .collect();

    if kept.is_empty() {
        warn!("no KB hits passed the score threshold; falling back to top-1");
        hits.truncate(1);
        hits
    } else {
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(score: f64) -> KbHit {
        KbHit {
            doc: KbDoc { page_content: "x".into(), metadata: KbMetadata { source_path: "a.md".into() } },
            score,
        }
    }

    #[test]
    fn similarity_mode_keeps_items_at_or_above_threshold() {
        let config = KbConfig { score_mode: ScoreMode::Similarity, score_threshold: 0.5, ..test_config() };
        let kept = apply_threshold(vec![hit(0.9), hit(0.2)], &config);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn empty_after_filter_falls_back_to_top1() {
        let config = KbConfig { score_mode: ScoreMode::Similarity, score_threshold: 0.99, ..test_config() };
        let kept = apply_threshold(vec![hit(0.5), hit(0.3)], &config);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.5);
    }

    #[test]
    fn distance_mode_keeps_items_at_or_below_threshold() {
        let config = KbConfig { score_mode: ScoreMode::Distance, score_threshold: 0.3, ..test_config() };
        let kept = apply_threshold(vec![hit(0.1), hit(0.9)], &config);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.1);
    }

    #[test]
    fn distance_mode_empty_after_filter_falls_back_to_best_not_worst() {
        let config = KbConfig { score_mode: ScoreMode::Distance, score_threshold: 0.05, ..test_config() };
        // Native store order is best-first even though the filter empties `kept`;
        // the fallback must keep the best (lowest-distance) hit, not the worst.
        let kept = apply_threshold(vec![hit(0.1), hit(0.9)], &config);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.1);
    }

    fn test_config() -> KbConfig {
        KbConfig::default()
    }
}
