// src/service.rs
//! Async facade over the engine: pulls snapshots from the stores (through
//! the cache), runs the coordinator and pushes decisions to the sink.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::cache::{CacheConfig, SnapshotCache};
use crate::config::Settings;
use crate::coordinator::{EnforcementCoordinator, Evaluation};
use crate::error::{EngineError, EngineResult};
use crate::escalation::{ActiveBan, BanPolicy, BanStatus};
use crate::matcher::DEFAULT_INDEX_THRESHOLD;
use crate::model::{GroupConfig, GroupId, IncomingMessage, UserId, MAX_WINDOW_SECS};
use crate::sink::DecisionSink;
use crate::store::{KeywordStore, PolicyStore};

/// Everything the service needs from the settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub defaults: GroupConfig,
    pub bans: BanPolicy,
    pub index_threshold: usize,
    pub cache: CacheConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            defaults: GroupConfig::default(),
            bans: BanPolicy::default(),
            index_threshold: DEFAULT_INDEX_THRESHOLD,
            cache: CacheConfig::default(),
        }
    }
}

impl From<&Settings> for ServiceConfig {
    fn from(s: &Settings) -> Self {
        Self {
            defaults: s.antispam.clone(),
            bans: s.bans.clone(),
            index_threshold: s.matcher.index_threshold,
            cache: s.cache.clone(),
        }
    }
}

/// Events coming from the admin side. Authorization already happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdminAction {
    /// Lift the active ban, keep the violation history.
    Unban {
        group: GroupId,
        user: UserId,
        #[serde(default)]
        admin: Option<i64>,
    },
    /// Lift the ban and forget violations and counters.
    Forgive {
        group: GroupId,
        user: UserId,
        #[serde(default)]
        admin: Option<i64>,
    },
    KeywordsChanged { group: GroupId },
    PolicyChanged { group: GroupId },
}

pub struct GuardService<K, P, S> {
    keywords: K,
    policies: P,
    sink: S,
    cache: SnapshotCache,
    coordinator: EnforcementCoordinator,
    defaults: GroupConfig,
}

impl<K, P, S> GuardService<K, P, S>
where
    K: KeywordStore,
    P: PolicyStore,
    S: DecisionSink,
{
    pub fn new(keywords: K, policies: P, sink: S, cfg: ServiceConfig) -> EngineResult<Arc<Self>> {
        Ok(Arc::new(Self {
            keywords,
            policies,
            sink,
            cache: SnapshotCache::new(&cfg.cache, cfg.index_threshold),
            coordinator: EnforcementCoordinator::new(cfg.bans)?,
            defaults: cfg.defaults.sanitized(),
        }))
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn coordinator(&self) -> &EnforcementCoordinator {
        &self.coordinator
    }

    /// Evaluate a message and deliver its decisions.
    ///
    /// Store failures give [`EngineError::CannotEvaluate`] before any counter
    /// is touched. Delivery failures are logged only.
    pub async fn handle_message(&self, msg: &IncomingMessage) -> EngineResult<Evaluation> {
        let group = msg.group;
        let policy = self
            .cache
            .policy(&self.policies, group, &self.defaults)
            .await
            .map_err(|e| EngineError::CannotEvaluate {
                group,
                reason: format!("{e:#}"),
            })?;
        let keywords = self
            .cache
            .keywords(&self.keywords, group)
            .await
            .map_err(|e| EngineError::CannotEvaluate {
                group,
                reason: format!("{e:#}"),
            })?;

        let eval = self
            .coordinator
            .process(msg, &keywords, &policy)
            .inspect_err(|e| error!(%group, user = %msg.user, error = %e, "evaluation failed"))?;

        for decision in &eval.decisions {
            if let Err(e) = self.sink.deliver(decision).await {
                warn!(%group, user = %msg.user, error = ?e, "decision delivery failed");
            }
        }
        Ok(eval)
    }

    /// Apply an admin action. Returns whether anything changed.
    pub async fn handle_admin(&self, action: AdminAction) -> bool {
        match action {
            AdminAction::Unban { group, user, admin } => {
                let lifted = self.coordinator.unban(group, user);
                info!(%group, %user, ?admin, lifted, "unban requested");
                lifted
            }
            AdminAction::Forgive { group, user, admin } => {
                let cleared = self.coordinator.forgive(group, user);
                info!(%group, %user, ?admin, cleared, "forgive requested");
                cleared
            }
            AdminAction::KeywordsChanged { group } => {
                self.cache.invalidate_keywords(group).await;
                true
            }
            AdminAction::PolicyChanged { group } => {
                self.cache.invalidate_policy(group).await;
                true
            }
        }
    }

    pub fn status(&self, group: GroupId, user: UserId, now: DateTime<Utc>) -> EngineResult<BanStatus> {
        self.coordinator.status(group, user, now)
    }

    pub fn active_bans(&self, group: Option<GroupId>, now: DateTime<Utc>) -> Vec<ActiveBan> {
        self.coordinator.active_bans(group, now)
    }

    /// Drop counters nobody touched within the longest possible window.
    pub fn prune_idle(&self, now: DateTime<Utc>) -> usize {
        self.coordinator
            .prune_idle(now, Duration::seconds(MAX_WINDOW_SECS as i64))
    }
}
