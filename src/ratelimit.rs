// src/ratelimit.rs
//! Sliding-window counters per (group, user).
//!
//! Eviction is lazy: a window is trimmed only when an event for the same
//! (group, user) and kind arrives. Nothing here runs on a timer.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::model::{GroupConfig, GroupId, LimitKind, MemberKey, UserId};

/// One observed fact about a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    /// Any message.
    Message,
    /// Message carried this many links (counted by the intake).
    Links(u32),
    /// Fingerprint of the normalized content, for the repeated-content streak.
    Content(u64),
}

impl ActivityEvent {
    pub fn kind(&self) -> LimitKind {
        match self {
            ActivityEvent::Message => LimitKind::Message,
            ActivityEvent::Links(_) => LimitKind::Link,
            ActivityEvent::Content(_) => LimitKind::RepeatedContent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum LimitVerdict {
    Ok,
    /// `count` strictly exceeded `limit` (the limit itself is allowed).
    Exceeded { kind: LimitKind, count: u32, limit: u32 },
}

impl LimitVerdict {
    pub fn is_exceeded(&self) -> bool {
        matches!(self, LimitVerdict::Exceeded { .. })
    }
}

/// Ephemeral counters of a single member.
#[derive(Debug, Default)]
pub struct UserActivityWindow {
    messages: VecDeque<DateTime<Utc>>,
    /// (when, how many links)
    links: VecDeque<(DateTime<Utc>, u32)>,
    /// Timestamps of the current identical-content streak.
    streak: VecDeque<DateTime<Utc>>,
    last_content: Option<u64>,
}

impl UserActivityWindow {
    fn latest(&self) -> Option<DateTime<Utc>> {
        [
            self.messages.iter().max().copied(),
            self.links.iter().map(|(t, _)| *t).max(),
            self.streak.iter().max().copied(),
        ]
        .into_iter()
        .flatten()
        .max()
    }
}

fn cutoff(at: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    at.checked_sub_signed(window)
}

// Timestamps may arrive out of order on redelivery, hence retain() not pop_front().
fn evict(ts: &mut VecDeque<DateTime<Utc>>, at: DateTime<Utc>, window: Duration) {
    if let Some(cut) = cutoff(at, window) {
        ts.retain(|t| *t >= cut);
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<MemberKey, UserActivityWindow>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `event` at `at` and tell whether the member is now over the
    /// limit configured for its kind.
    pub fn record_and_check(
        &self,
        group: GroupId,
        user: UserId,
        event: ActivityEvent,
        at: DateTime<Utc>,
        cfg: &GroupConfig,
    ) -> LimitVerdict {
        let kind = event.kind();
        if event == ActivityEvent::Links(0) {
            return LimitVerdict::Ok;
        }

        let window = cfg.window_for(kind);
        let limit = cfg.limit_for(kind);
        let mut w = self.windows.entry((group, user)).or_default();

        let count = match event {
            ActivityEvent::Message => {
                evict(&mut w.messages, at, window);
                w.messages.push_back(at);
                saturating_u32(w.messages.len())
            }
            ActivityEvent::Links(n) => {
                if let Some(cut) = cutoff(at, window) {
                    w.links.retain(|(t, _)| *t >= cut);
                }
                w.links.push_back((at, n));
                w.links.iter().fold(0u32, |acc, (_, c)| acc.saturating_add(*c))
            }
            ActivityEvent::Content(fp) => {
                if w.last_content == Some(fp) {
                    evict(&mut w.streak, at, window);
                } else {
                    w.streak.clear();
                    w.last_content = Some(fp);
                }
                w.streak.push_back(at);
                saturating_u32(w.streak.len())
            }
        };

        if count > limit {
            LimitVerdict::Exceeded { kind, count, limit }
        } else {
            LimitVerdict::Ok
        }
    }

    /// End the member's repeated-content streak without counting anything.
    /// Used for messages without text: they are not a repetition either.
    pub fn break_streak(&self, group: GroupId, user: UserId) {
        if let Some(mut w) = self.windows.get_mut(&(group, user)) {
            w.streak.clear();
            w.last_content = None;
        }
    }

    /// Drop all counters of a member.
    pub fn forget(&self, group: GroupId, user: UserId) {
        self.windows.remove(&(group, user));
    }

    /// Remove members whose newest event is older than `now - max_window`.
    /// Returns how many were dropped.
    pub fn prune_idle(&self, now: DateTime<Utc>, max_window: Duration) -> usize {
        let before = self.windows.len();
        match cutoff(now, max_window) {
            Some(cut) => self
                .windows
                .retain(|_, w| w.latest().is_some_and(|t| t >= cut)),
            None => return 0,
        }
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_members(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const G: GroupId = GroupId(-100);
    const U: UserId = UserId(7);

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn sixth_message_in_window_exceeds() {
        let rl = RateLimiter::new();
        let cfg = GroupConfig::default(); // 5 / 10s
        for i in 0..5 {
            let v = rl.record_and_check(G, U, ActivityEvent::Message, t(i), &cfg);
            assert_eq!(v, LimitVerdict::Ok, "message {}", i + 1);
        }
        let v = rl.record_and_check(G, U, ActivityEvent::Message, t(5), &cfg);
        assert_eq!(
            v,
            LimitVerdict::Exceeded { kind: LimitKind::Message, count: 6, limit: 5 }
        );
    }

    #[test]
    fn old_events_are_evicted() {
        let rl = RateLimiter::new();
        let cfg = GroupConfig { message_limit: 1, ..Default::default() };
        assert!(!rl.record_and_check(G, U, ActivityEvent::Message, t(0), &cfg).is_exceeded());
        // t=0 is outside [1, 11]
        assert!(!rl.record_and_check(G, U, ActivityEvent::Message, t(11), &cfg).is_exceeded());
    }

    #[test]
    fn event_exactly_at_cutoff_still_counts() {
        let rl = RateLimiter::new();
        let cfg = GroupConfig { message_limit: 1, ..Default::default() };
        rl.record_and_check(G, U, ActivityEvent::Message, t(0), &cfg);
        assert!(rl.record_and_check(G, U, ActivityEvent::Message, t(10), &cfg).is_exceeded());
    }

    #[test]
    fn links_are_summed() {
        let rl = RateLimiter::new();
        let cfg = GroupConfig::default(); // 3 links / 10s
        assert_eq!(rl.record_and_check(G, U, ActivityEvent::Links(2), t(0), &cfg), LimitVerdict::Ok);
        assert_eq!(rl.record_and_check(G, U, ActivityEvent::Links(0), t(1), &cfg), LimitVerdict::Ok);
        assert_eq!(rl.record_and_check(G, U, ActivityEvent::Links(1), t(2), &cfg), LimitVerdict::Ok);
        assert_eq!(
            rl.record_and_check(G, U, ActivityEvent::Links(1), t(3), &cfg),
            LimitVerdict::Exceeded { kind: LimitKind::Link, count: 4, limit: 3 }
        );
    }

    #[test]
    fn different_content_resets_streak() {
        let rl = RateLimiter::new();
        let cfg = GroupConfig::default(); // 3 repeats / 10s
        for i in 0..3 {
            assert!(!rl.record_and_check(G, U, ActivityEvent::Content(1), t(i), &cfg).is_exceeded());
        }
        assert!(!rl.record_and_check(G, U, ActivityEvent::Content(2), t(3), &cfg).is_exceeded());
        for i in 4..6 {
            assert!(!rl.record_and_check(G, U, ActivityEvent::Content(1), t(i), &cfg).is_exceeded());
        }
        // streak of "1" restarted at t=4: t4, t5, t6, t7 -> fourth exceeds
        assert!(!rl.record_and_check(G, U, ActivityEvent::Content(1), t(6), &cfg).is_exceeded());
        assert!(rl.record_and_check(G, U, ActivityEvent::Content(1), t(7), &cfg).is_exceeded());
    }

    #[test]
    fn break_streak_resets_without_counting() {
        let rl = RateLimiter::new();
        let cfg = GroupConfig { repeat_limit: 2, ..Default::default() };
        rl.record_and_check(G, U, ActivityEvent::Content(9), t(0), &cfg);
        rl.record_and_check(G, U, ActivityEvent::Content(9), t(1), &cfg);
        rl.record_and_check(G, U, ActivityEvent::Message, t(1), &cfg);
        rl.break_streak(G, U);
        assert!(!rl.record_and_check(G, U, ActivityEvent::Content(9), t(2), &cfg).is_exceeded());
        // messages are untouched
        let v = rl.record_and_check(G, U, ActivityEvent::Message, t(2), &cfg);
        assert_eq!(v, LimitVerdict::Ok);

        // unknown member: nothing gets created
        rl.break_streak(G, UserId(999));
        assert_eq!(rl.tracked_members(), 1);
    }

    #[test]
    fn groups_do_not_share_counters() {
        let rl = RateLimiter::new();
        let cfg = GroupConfig { message_limit: 1, ..Default::default() };
        rl.record_and_check(G, U, ActivityEvent::Message, t(0), &cfg);
        let other = GroupId(-200);
        assert!(!rl.record_and_check(other, U, ActivityEvent::Message, t(0), &cfg).is_exceeded());
        assert!(rl.record_and_check(G, U, ActivityEvent::Message, t(1), &cfg).is_exceeded());
    }

    #[test]
    fn prune_drops_only_idle_members() {
        let rl = RateLimiter::new();
        let cfg = GroupConfig::default();
        rl.record_and_check(G, U, ActivityEvent::Message, t(0), &cfg);
        rl.record_and_check(G, UserId(8), ActivityEvent::Message, t(50), &cfg);
        let dropped = rl.prune_idle(t(55), Duration::seconds(10));
        assert_eq!(dropped, 1);
        assert_eq!(rl.tracked_members(), 1);
    }
}
