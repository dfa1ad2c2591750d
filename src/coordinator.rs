// src/coordinator.rs
//! Per-message orchestration: match keywords, feed the limiter, escalate,
//! and turn the outcome into [`Decision`]s for the delivery side.
//!
//! All state changes of one (group, user) happen under that member's lock,
//! so a later message always sees the counters of an earlier one. Different
//! members never wait for each other.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::escalation::{ActiveBan, BanEscalator, BanNotice, BanPolicy, BanStatus};
use crate::matcher::{find_match, KeywordSet, MatchMode, MessageText};
use crate::model::{GroupConfig, GroupId, IncomingMessage, LimitKind, MemberKey, Response, UserId};
use crate::normalize::normalize;
use crate::ratelimit::{ActivityEvent, LimitVerdict, RateLimiter};

/// What the delivery side should do. Pure data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Reply {
        group: GroupId,
        user: UserId,
        keyword_id: i64,
        response: Response,
        mode: MatchMode,
        score: f64,
    },
    /// Limit exceeded in a group that doesn't auto-ban for this kind.
    Warn {
        group: GroupId,
        user: UserId,
        kind: LimitKind,
        count: u32,
        limit: u32,
    },
    Ban(BanNotice),
}

impl Decision {
    pub fn group(&self) -> GroupId {
        match self {
            Decision::Reply { group, .. } | Decision::Warn { group, .. } => *group,
            Decision::Ban(n) => n.group,
        }
    }

    pub fn user(&self) -> UserId {
        match self {
            Decision::Reply { user, .. } | Decision::Warn { user, .. } => *user,
            Decision::Ban(n) => n.user,
        }
    }
}

/// Result of [`EnforcementCoordinator::process`].
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// One verdict per recorded limiter event, in recording order.
    pub verdicts: Vec<LimitVerdict>,
    pub decisions: Vec<Decision>,
    /// Member is under a ban after this message (new or earlier).
    pub banned: bool,
}

impl Evaluation {
    /// First exceeded verdict, or `Ok`.
    pub fn verdict(&self) -> LimitVerdict {
        self.verdicts
            .iter()
            .copied()
            .find(LimitVerdict::is_exceeded)
            .unwrap_or(LimitVerdict::Ok)
    }

    pub fn ban_notice(&self) -> Option<&BanNotice> {
        self.decisions.iter().find_map(|d| match d {
            Decision::Ban(n) => Some(n),
            _ => None,
        })
    }

    pub fn reply(&self) -> Option<&Decision> {
        self.decisions
            .iter()
            .find(|d| matches!(d, Decision::Reply { .. }))
    }
}

/// Content fingerprint for the repeated-content streak.
fn content_fingerprint(text: &str) -> Option<u64> {
    let normalized = normalize(text, false, false);
    if normalized.is_empty() {
        return None;
    }
    let mut h = DefaultHasher::new();
    normalized.as_str().hash(&mut h);
    Some(h.finish())
}

fn lock(m: &Mutex<()>) -> MutexGuard<'_, ()> {
    // the guarded data is (), a poisoned lock carries no broken state
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug)]
pub struct EnforcementCoordinator {
    limiter: RateLimiter,
    escalator: BanEscalator,
    locks: DashMap<MemberKey, Arc<Mutex<()>>>,
}

impl EnforcementCoordinator {
    pub fn new(policy: BanPolicy) -> EngineResult<Self> {
        Ok(Self {
            limiter: RateLimiter::new(),
            escalator: BanEscalator::new(policy)?,
            locks: DashMap::new(),
        })
    }

    pub fn escalator(&self) -> &BanEscalator {
        &self.escalator
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn member_lock(&self, key: MemberKey) -> Arc<Mutex<()>> {
        self.locks.entry(key).or_default().clone()
    }

    /// Evaluate one message. `cfg` should already be sanitized.
    ///
    /// Counters touched here stay touched even if the caller throws the
    /// result away.
    pub fn process(
        &self,
        msg: &IncomingMessage,
        keywords: &KeywordSet,
        cfg: &GroupConfig,
    ) -> EngineResult<Evaluation> {
        let (group, user, now) = (msg.group, msg.user, msg.timestamp);
        let member = self.member_lock(msg.key());
        let _guard = lock(&member);

        let text = msg.text.as_deref().unwrap_or("");
        let message = MessageText::new(text);
        let matched = find_match(&message, keywords);
        if let Some(m) = &matched {
            debug!(%group, %user, keyword_id = m.keyword.id, mode = ?m.mode, score = m.score, "keyword matched");
        }

        let mut events = vec![ActivityEvent::Message];
        if cfg.link_spam_enabled && msg.link_count > 0 {
            events.push(ActivityEvent::Links(msg.link_count));
        }
        match content_fingerprint(text) {
            Some(fp) => events.push(ActivityEvent::Content(fp)),
            None => self.limiter.break_streak(group, user),
        }

        let mut eval = Evaluation::default();
        for event in events {
            let verdict = self.limiter.record_and_check(group, user, event, now, cfg);
            eval.verdicts.push(verdict);

            let LimitVerdict::Exceeded { kind, count, limit } = verdict else {
                continue;
            };
            if cfg.auto_ban(kind) {
                if let Some(notice) = self.escalator.register_violation(group, user, kind, now)? {
                    eval.decisions.push(Decision::Ban(notice));
                }
            } else {
                warn!(%group, %user, %kind, count, limit, "limit exceeded, auto-ban disabled");
                eval.decisions.push(Decision::Warn {
                    group,
                    user,
                    kind,
                    count,
                    limit,
                });
            }
        }

        eval.banned = self.escalator.status(group, user, now)?.is_banned();

        if let Some(m) = matched {
            if eval.banned && cfg.suppress_banned_replies {
                debug!(%group, %user, keyword_id = m.keyword.id, "reply suppressed for banned member");
            } else {
                eval.decisions.push(Decision::Reply {
                    group,
                    user,
                    keyword_id: m.keyword.id,
                    response: m.keyword.response.clone(),
                    mode: m.mode,
                    score: m.score,
                });
            }
        }

        Ok(eval)
    }

    /// Admin unban; keeps the violation count. No-op when not banned.
    pub fn unban(&self, group: GroupId, user: UserId) -> bool {
        let member = self.member_lock((group, user));
        let _guard = lock(&member);
        self.escalator.unban(group, user)
    }

    /// Clear ban record and activity counters of a member.
    pub fn forgive(&self, group: GroupId, user: UserId) -> bool {
        let member = self.member_lock((group, user));
        let _guard = lock(&member);
        self.limiter.forget(group, user);
        self.escalator.forgive(group, user)
    }

    pub fn status(&self, group: GroupId, user: UserId, now: DateTime<Utc>) -> EngineResult<BanStatus> {
        let member = self.member_lock((group, user));
        let _guard = lock(&member);
        self.escalator.status(group, user, now)
    }

    pub fn active_bans(&self, group: Option<GroupId>, now: DateTime<Utc>) -> Vec<ActiveBan> {
        self.escalator.active_bans(group, now)
    }

    /// Drop idle activity windows and unused member locks.
    pub fn prune_idle(&self, now: DateTime<Utc>, max_window: Duration) -> usize {
        let dropped = self.limiter.prune_idle(now, max_window);
        self.locks.retain(|_, l| Arc::strong_count(l) > 1);
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Keyword;
    use chrono::TimeZone;

    const G: GroupId = GroupId(10);
    const U: UserId = UserId(20);

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn msg(text: &str, at: i64) -> IncomingMessage {
        IncomingMessage::new(G, U, Some(text.to_string()), t(at))
    }

    fn coordinator() -> EnforcementCoordinator {
        EnforcementCoordinator::new(BanPolicy { base_secs: 60, multiplier: 2.0, max_secs: None }).unwrap()
    }

    #[test]
    fn fingerprint_ignores_case_and_spacing() {
        assert_eq!(content_fingerprint("Hello  World"), content_fingerprint(" hello world"));
        assert_ne!(content_fingerprint("hello"), content_fingerprint("hullo"));
        assert_eq!(content_fingerprint("   "), None);
    }

    #[test]
    fn reply_emitted_for_clear_member() {
        let c = coordinator();
        let set = KeywordSet::new(vec![Keyword::text(1, "price", "10 EUR")]);
        let eval = c.process(&msg("what's the PRICE?", 0), &set, &GroupConfig::default()).unwrap();
        assert_eq!(eval.verdict(), LimitVerdict::Ok);
        match eval.reply() {
            Some(Decision::Reply { keyword_id, mode, .. }) => {
                assert_eq!(*keyword_id, 1);
                assert_eq!(*mode, MatchMode::Pattern);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn warn_instead_of_ban_when_auto_ban_off() {
        let c = coordinator();
        let cfg = GroupConfig { message_limit: 1, auto_ban_flood: false, ..Default::default() };
        let set = KeywordSet::default();
        c.process(&msg("a", 0), &set, &cfg).unwrap();
        let eval = c.process(&msg("b", 1), &set, &cfg).unwrap();
        assert!(!eval.banned);
        assert_eq!(
            eval.decisions,
            vec![Decision::Warn { group: G, user: U, kind: LimitKind::Message, count: 2, limit: 1 }]
        );
    }

    #[test]
    fn links_not_counted_when_link_spam_disabled() {
        let c = coordinator();
        let cfg = GroupConfig { link_limit: 1, link_spam_enabled: false, ..Default::default() };
        let set = KeywordSet::default();
        let eval = c
            .process(&msg("https://a.example https://b.example", 0), &set, &cfg)
            .unwrap();
        assert_eq!(eval.verdicts.len(), 2); // message + content
        assert!(!eval.banned);
    }

    #[test]
    fn prune_keeps_locks_in_use() {
        let c = coordinator();
        let cfg = GroupConfig::default();
        c.process(&msg("x", 0), &KeywordSet::default(), &cfg).unwrap();
        let held = c.member_lock((G, U));
        c.prune_idle(t(100), Duration::seconds(10));
        assert!(c.locks.contains_key(&(G, U)));
        drop(held);
        c.prune_idle(t(100), Duration::seconds(10));
        assert!(c.locks.is_empty());
    }
}
