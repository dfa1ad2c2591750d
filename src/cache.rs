// src/cache.rs
//! Snapshot cache in front of the keyword and policy stores.
//!
//! Entries live at most `ttl` (the staleness bound for keyword edits made
//! elsewhere); `invalidate_*` drops them right away when the admin side
//! tells us something changed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::matcher::KeywordSet;
use crate::model::{GroupConfig, GroupId};
use crate::store::{KeywordStore, PolicyStore};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    pub keyword_ttl_secs: u64,
    pub policy_ttl_secs: u64,
    pub max_groups: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            keyword_ttl_secs: 60,
            policy_ttl_secs: 60,
            max_groups: 10_000,
        }
    }
}

#[derive(Clone)]
pub struct SnapshotCache {
    keywords: Cache<GroupId, Arc<KeywordSet>>,
    policies: Cache<GroupId, Arc<GroupConfig>>,
    index_threshold: usize,
}

impl SnapshotCache {
    pub fn new(cfg: &CacheConfig, index_threshold: usize) -> Self {
        let keywords = Cache::builder()
            .max_capacity(cfg.max_groups)
            .time_to_live(Duration::from_secs(cfg.keyword_ttl_secs.max(1)))
            .build();
        let policies = Cache::builder()
            .max_capacity(cfg.max_groups)
            .time_to_live(Duration::from_secs(cfg.policy_ttl_secs.max(1)))
            .build();
        Self {
            keywords,
            policies,
            index_threshold,
        }
    }

    /// Compiled keyword set of `group`, loading it on a miss.
    /// Concurrent misses for the same group share one load.
    pub async fn keywords<K: KeywordStore>(&self, store: &K, group: GroupId) -> Result<Arc<KeywordSet>> {
        let threshold = self.index_threshold;
        self.keywords
            .try_get_with(group, async move {
                let list = store.list_keywords(group).await?;
                Ok::<_, anyhow::Error>(Arc::new(KeywordSet::with_index_threshold(list, threshold)))
            })
            .await
            .map_err(|e| anyhow!("loading keywords of group {group}: {e:#}"))
    }

    /// Sanitized policy of `group`; `defaults` when the store has none.
    pub async fn policy<P: PolicyStore>(
        &self,
        store: &P,
        group: GroupId,
        defaults: &GroupConfig,
    ) -> Result<Arc<GroupConfig>> {
        self.policies
            .try_get_with(group, async move {
                let cfg = store.get_policy(group).await?.unwrap_or_else(|| defaults.clone());
                Ok::<_, anyhow::Error>(Arc::new(cfg.sanitized()))
            })
            .await
            .map_err(|e| anyhow!("loading policy of group {group}: {e:#}"))
    }

    pub async fn invalidate_keywords(&self, group: GroupId) {
        self.keywords.invalidate(&group).await;
    }

    pub async fn invalidate_policy(&self, group: GroupId) {
        self.policies.invalidate(&group).await;
    }
}
