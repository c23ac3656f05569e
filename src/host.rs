//! Host-side collaborators: reply delivery, the impression store, and the
//! group allow/deny list.

use crate::error::DeliveryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

// ── Reply dispatch ─────────────────────────────────────

/// Posts the bot's utterance to the platform.
#[async_trait]
pub trait ReplyDispatcher: Send + Sync {
    async fn dispatch_reply(&self, group_id: &str, text: &str) -> Result<(), DeliveryError>;
}

// ── Impressions ────────────────────────────────────────

/// Per (group, user) affinity in [0, 1], owned by the host.
#[async_trait]
pub trait ImpressionStore: Send + Sync {
    async fn get_impression(&self, group_id: &str, user_id: &str) -> f64;

    /// Nudge the affinity by `delta`. The store clamps.
    async fn update_impression(&self, group_id: &str, user_id: &str, delta: f64)
        -> Result<(), String>;
}

/// Process-local impression store. Unknown users start at `default_score`.
pub struct InMemoryImpressionStore {
    scores: RwLock<HashMap<(String, String), f64>>,
    default_score: f64,
}

impl InMemoryImpressionStore {
    pub fn new(default_score: f64) -> Self {
        Self {
            scores: RwLock::new(HashMap::new()),
            default_score: default_score.clamp(0.0, 1.0),
        }
    }

    pub async fn set(&self, group_id: &str, user_id: &str, score: f64) {
        self.scores
            .write()
            .await
            .insert((group_id.to_string(), user_id.to_string()), score.clamp(0.0, 1.0));
    }
}

impl Default for InMemoryImpressionStore {
    fn default() -> Self {
        Self::new(0.5)
    }
}

#[async_trait]
impl ImpressionStore for InMemoryImpressionStore {
    async fn get_impression(&self, group_id: &str, user_id: &str) -> f64 {
        self.scores
            .read()
            .await
            .get(&(group_id.to_string(), user_id.to_string()))
            .copied()
            .unwrap_or(self.default_score)
    }

    async fn update_impression(
        &self,
        group_id: &str,
        user_id: &str,
        delta: f64,
    ) -> Result<(), String> {
        let mut scores = self.scores.write().await;
        let entry = scores
            .entry((group_id.to_string(), user_id.to_string()))
            .or_insert(self.default_score);
        *entry = (*entry + delta).clamp(0.0, 1.0);
        Ok(())
    }
}

// ── Group eligibility ──────────────────────────────────

pub trait GroupFilter: Send + Sync {
    fn is_group_eligible(&self, group_id: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListMode {
    /// Only listed groups. Empty list = reject all.
    Whitelist,
    /// Every group except listed ones.
    #[default]
    Blacklist,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupListConfig {
    #[serde(default)]
    pub mode: ListMode,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl GroupFilter for GroupListConfig {
    fn is_group_eligible(&self, group_id: &str) -> bool {
        let listed = self.groups.iter().any(|g| g == group_id);
        match self.mode {
            ListMode::Whitelist => listed,
            ListMode::Blacklist => !listed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_admits_only_listed() {
        let f = GroupListConfig {
            mode: ListMode::Whitelist,
            groups: vec!["100".into()],
        };
        assert!(f.is_group_eligible("100"));
        assert!(!f.is_group_eligible("200"));
        let empty = GroupListConfig {
            mode: ListMode::Whitelist,
            groups: vec![],
        };
        assert!(!empty.is_group_eligible("100"), "empty whitelist rejects all");
    }

    #[test]
    fn blacklist_rejects_only_listed() {
        let f = GroupListConfig {
            mode: ListMode::Blacklist,
            groups: vec!["100".into()],
        };
        assert!(!f.is_group_eligible("100"));
        assert!(f.is_group_eligible("200"));
        assert!(GroupListConfig::default().is_group_eligible("anything"));
    }

    #[test]
    fn list_mode_parses_snake_case() {
        let cfg: GroupListConfig =
            serde_json::from_str(r#"{"mode": "whitelist", "groups": ["1"]}"#).unwrap();
        assert_eq!(cfg.mode, ListMode::Whitelist);
    }

    #[tokio::test]
    async fn impression_updates_clamp() {
        let store = InMemoryImpressionStore::new(0.5);
        assert_eq!(store.get_impression("g", "u").await, 0.5);
        store.update_impression("g", "u", 0.7).await.unwrap();
        assert_eq!(store.get_impression("g", "u").await, 1.0);
        store.update_impression("g", "u", -2.0).await.unwrap();
        assert_eq!(store.get_impression("g", "u").await, 0.0);
        assert_eq!(store.get_impression("other", "u").await, 0.5, "scoped per group");
    }
}
