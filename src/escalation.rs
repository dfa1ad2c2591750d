// src/escalation.rs
//! Ban escalation: Clear ⇄ Banned per (group, user).
//!
//! Duration of the n-th ban (n counted from 0) is `base * multiplier^n`,
//! optionally capped. Violations are never forgotten by time passing and an
//! explicit unban keeps them as well, so repeat offenders escalate faster.
//! Expiry is evaluated lazily whenever the state is read.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::model::{GroupId, LimitKind, MemberKey, UserId};

/// Hard ceiling on a single ban, applied even without `max_secs`.
const HARD_MAX_BAN_SECS: u64 = 366 * 24 * 3600;

/// Product-wide escalation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanPolicy {
    /// First ban length in seconds.
    pub base_secs: u64,
    /// Growth factor between consecutive bans; must be > 1.
    pub multiplier: f64,
    /// Optional cap on a single ban.
    pub max_secs: Option<u64>,
}

impl Default for BanPolicy {
    fn default() -> Self {
        // 1m, 5m, 25m, ~2h, cap 6h
        Self {
            base_secs: 60,
            multiplier: 5.0,
            max_secs: Some(6 * 3600),
        }
    }
}

impl BanPolicy {
    pub fn validate(&self) -> EngineResult<()> {
        if self.base_secs == 0 {
            return Err(EngineError::InvalidBanPolicy("base_secs must be positive".into()));
        }
        if !(self.multiplier.is_finite() && self.multiplier > 1.0) {
            return Err(EngineError::InvalidBanPolicy(format!(
                "multiplier must be a finite number > 1, got {}",
                self.multiplier
            )));
        }
        if self.max_secs.is_some_and(|m| m < self.base_secs) {
            return Err(EngineError::InvalidBanPolicy("max_secs is below base_secs".into()));
        }
        Ok(())
    }

    /// Length of a ban given the violations recorded before it.
    pub fn duration_for(&self, prior_violations: u32) -> Duration {
        let exp = i32::try_from(prior_violations).unwrap_or(i32::MAX);
        let raw = self.base_secs as f64 * self.multiplier.powi(exp);
        let cap = self.max_secs.unwrap_or(HARD_MAX_BAN_SECS).min(HARD_MAX_BAN_SECS);
        // float → int casts saturate; inf lands on u64::MAX and gets capped
        let secs = (raw as u64).min(cap).max(1);
        Duration::seconds(secs as i64)
    }
}

/// Ban record of one member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanState {
    pub banned: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub violation_count: u32,
    pub last_violation: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BanStatus {
    Clear,
    Banned { until: DateTime<Utc> },
}

impl BanStatus {
    pub fn is_banned(&self) -> bool {
        matches!(self, BanStatus::Banned { .. })
    }
}

/// Emitted on every Clear → Banned transition; delivery is someone else's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanNotice {
    pub group: GroupId,
    pub user: UserId,
    pub kind: LimitKind,
    pub expires_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub violation_count: u32,
}

/// Row of [`BanEscalator::active_bans`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveBan {
    pub group: GroupId,
    pub user: UserId,
    pub until: DateTime<Utc>,
    pub violation_count: u32,
}

/// Check the record and apply passive expiry.
fn settle(key: MemberKey, state: &mut BanState, now: DateTime<Utc>) -> EngineResult<BanStatus> {
    if state.expires_at.is_some() && state.violation_count == 0 {
        return Err(EngineError::InconsistentBanState {
            group: key.0,
            user: key.1,
        });
    }
    match (state.banned, state.expires_at) {
        (true, Some(until)) if until > now => Ok(BanStatus::Banned { until }),
        (true, _) => {
            debug!(group = %key.0, user = %key.1, "ban expired");
            state.banned = false;
            state.expires_at = None;
            Ok(BanStatus::Clear)
        }
        (false, _) => Ok(BanStatus::Clear),
    }
}

#[derive(Debug)]
pub struct BanEscalator {
    policy: BanPolicy,
    states: DashMap<MemberKey, BanState>,
}

impl BanEscalator {
    pub fn new(policy: BanPolicy) -> EngineResult<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            states: DashMap::new(),
        })
    }

    pub fn policy(&self) -> &BanPolicy {
        &self.policy
    }

    /// Current status; an expired ban is cleared here.
    pub fn status(&self, group: GroupId, user: UserId, now: DateTime<Utc>) -> EngineResult<BanStatus> {
        let key = (group, user);
        match self.states.get_mut(&key) {
            Some(mut state) => settle(key, &mut state, now),
            None => Ok(BanStatus::Clear),
        }
    }

    /// Register a limit violation. Bans a Clear member and returns the notice;
    /// a member already under a ban stays as is and `None` comes back.
    pub fn register_violation(
        &self,
        group: GroupId,
        user: UserId,
        kind: LimitKind,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<BanNotice>> {
        let key = (group, user);
        let mut state = self.states.entry(key).or_default();
        if settle(key, &mut state, now)?.is_banned() {
            return Ok(None);
        }

        let duration = self.policy.duration_for(state.violation_count);
        let expires_at = now
            .checked_add_signed(duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        state.violation_count = state.violation_count.saturating_add(1);
        state.banned = true;
        state.expires_at = Some(expires_at);
        state.last_violation = Some(now);

        info!(
            %group, %user, %kind,
            violations = state.violation_count,
            duration_secs = duration.num_seconds(),
            "member banned"
        );

        Ok(Some(BanNotice {
            group,
            user,
            kind,
            expires_at,
            duration_secs: duration.num_seconds(),
            violation_count: state.violation_count,
        }))
    }

    /// Lift an active ban. Violations stay; unbanning a Clear member is a no-op.
    /// Returns whether a ban was lifted.
    pub fn unban(&self, group: GroupId, user: UserId) -> bool {
        let Some(mut state) = self.states.get_mut(&(group, user)) else {
            return false;
        };
        if !state.banned {
            return false;
        }
        state.banned = false;
        state.expires_at = None;
        info!(%group, %user, violations = state.violation_count, "member unbanned");
        true
    }

    /// Wipe the whole record, violations included.
    pub fn forgive(&self, group: GroupId, user: UserId) -> bool {
        let removed = self.states.remove(&(group, user)).is_some();
        if removed {
            info!(%group, %user, "ban record cleared");
        }
        removed
    }

    /// Install a record as-is (e.g. hydrated from storage). Validated on next read.
    pub fn restore(&self, group: GroupId, user: UserId, state: BanState) {
        self.states.insert((group, user), state);
    }

    pub fn state(&self, group: GroupId, user: UserId) -> Option<BanState> {
        self.states.get(&(group, user)).map(|s| s.clone())
    }

    /// Bans still running at `now`, optionally for one group only.
    pub fn active_bans(&self, group: Option<GroupId>, now: DateTime<Utc>) -> Vec<ActiveBan> {
        let mut out: Vec<ActiveBan> = self
            .states
            .iter()
            .filter(|e| group.is_none_or(|g| e.key().0 == g))
            .filter_map(|e| match (e.banned, e.expires_at) {
                (true, Some(until)) if until > now => Some(ActiveBan {
                    group: e.key().0,
                    user: e.key().1,
                    until,
                    violation_count: e.violation_count,
                }),
                _ => None,
            })
            .collect();
        out.sort_by_key(|b| (b.group, b.until, b.user));
        out
    }
}
