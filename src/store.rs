// src/store.rs
//! Read side of the keyword and policy stores.
//!
//! The engine only ever reads snapshots; adding/removing keywords belongs to
//! the admin tooling that owns the store. [`MemoryStore`] backs tests and the
//! file-seeded mode of the binary, [`crate::db::PgStore`] the product tables.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::db::PgStore;
use crate::model::{GroupConfig, GroupId, Keyword};

pub trait KeywordStore: Send + Sync {
    /// Keywords of `group` in insertion order.
    fn list_keywords(&self, group: GroupId) -> impl Future<Output = Result<Vec<Keyword>>> + Send;
}

pub trait PolicyStore: Send + Sync {
    /// Stored policy of `group`; `None` means "use defaults".
    fn get_policy(&self, group: GroupId) -> impl Future<Output = Result<Option<GroupConfig>>> + Send;
}

/* =========================================
   In-memory store
   ========================================= */

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupEntry {
    #[serde(default)]
    pub policy: Option<GroupConfig>,
    #[serde(default)]
    pub keywords: Vec<Keyword>,
}

/// Seed file format for [`MemoryStore::from_json_file`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedFile {
    pub groups: Vec<SeedGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedGroup {
    pub group: GroupId,
    #[serde(flatten)]
    pub entry: GroupEntry,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    groups: Arc<DashMap<GroupId, GroupEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: SeedFile) -> Self {
        let store = Self::new();
        for g in seed.groups {
            store.groups.insert(g.group, g.entry);
        }
        store
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading seed file {}", path.display()))?;
        let seed: SeedFile = serde_json::from_str(&raw)
            .with_context(|| format!("parsing seed file {}", path.display()))?;
        Ok(Self::from_seed(seed))
    }

    pub fn add_keyword(&self, group: GroupId, keyword: Keyword) {
        self.groups.entry(group).or_default().keywords.push(keyword);
    }

    pub fn remove_keyword(&self, group: GroupId, keyword_id: i64) -> bool {
        let Some(mut entry) = self.groups.get_mut(&group) else {
            return false;
        };
        let before = entry.keywords.len();
        entry.keywords.retain(|k| k.id != keyword_id);
        entry.keywords.len() != before
    }

    pub fn set_policy(&self, group: GroupId, policy: GroupConfig) {
        self.groups.entry(group).or_default().policy = Some(policy);
    }
}

impl KeywordStore for MemoryStore {
    async fn list_keywords(&self, group: GroupId) -> Result<Vec<Keyword>> {
        Ok(self
            .groups
            .get(&group)
            .map(|g| g.keywords.clone())
            .unwrap_or_default())
    }
}

impl PolicyStore for MemoryStore {
    async fn get_policy(&self, group: GroupId) -> Result<Option<GroupConfig>> {
        Ok(self.groups.get(&group).and_then(|g| g.policy.clone()))
    }
}

/* =========================================
   Backend chosen at startup
   ========================================= */

#[derive(Debug, Clone)]
pub enum Backend {
    Memory(MemoryStore),
    Postgres(PgStore),
}

impl KeywordStore for Backend {
    async fn list_keywords(&self, group: GroupId) -> Result<Vec<Keyword>> {
        match self {
            Backend::Memory(s) => s.list_keywords(group).await,
            Backend::Postgres(s) => s.list_keywords(group).await,
        }
    }
}

impl PolicyStore for Backend {
    async fn get_policy(&self, group: GroupId) -> Result<Option<GroupConfig>> {
        match self {
            Backend::Memory(s) => s.get_policy(group).await,
            Backend::Postgres(s) => s.get_policy(group).await,
        }
    }
}
