// src/feed.rs
//! Line-delimited JSON feed: one chat or admin event per line.
//!
//! ```text
//! {"type":"message","group":-100,"user":7,"text":"привет всем"}
//! {"type":"admin","action":"unban","group":-100,"user":7,"admin":1}
//! ```

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::links;
use crate::model::{GroupId, IncomingMessage, UserId};
use crate::service::{AdminAction, GuardService};
use crate::sink::DecisionSink;
use crate::store::{KeywordStore, PolicyStore};

/// Idle counters are swept after this many messages.
const PRUNE_EVERY: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Message {
        group: GroupId,
        user: UserId,
        #[serde(default)]
        text: Option<String>,
        /// Counted from `text` when the transport didn't do it.
        #[serde(default)]
        link_count: Option<u32>,
        /// Receive time when missing.
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    Admin(AdminAction),
}

impl FeedEvent {
    pub fn parse(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

pub fn to_message(
    group: GroupId,
    user: UserId,
    text: Option<String>,
    link_count: Option<u32>,
    timestamp: Option<DateTime<Utc>>,
) -> IncomingMessage {
    let link_count =
        link_count.unwrap_or_else(|| text.as_deref().map(links::count_links).unwrap_or(0));
    IncomingMessage {
        group,
        user,
        text,
        link_count,
        timestamp: timestamp.unwrap_or_else(Utc::now),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub messages: u64,
    pub admin_actions: u64,
    /// Lines that weren't valid events.
    pub rejected: u64,
    /// Messages the engine could not evaluate.
    pub failed: u64,
}

/// Drive `service` until `input` hits EOF.
pub async fn run<K, P, S, R>(service: Arc<GuardService<K, P, S>>, input: R) -> Result<FeedStats>
where
    K: KeywordStore,
    P: PolicyStore,
    S: DecisionSink,
    R: AsyncBufRead + Unpin,
{
    let mut stats = FeedStats::default();
    let mut lines = input.lines();
    let mut line_no: u64 = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event = match FeedEvent::parse(line) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping malformed feed line");
                stats.rejected += 1;
                continue;
            }
        };

        match event {
            FeedEvent::Message { group, user, text, link_count, timestamp } => {
                let msg = to_message(group, user, text, link_count, timestamp);
                stats.messages += 1;
                match service.handle_message(&msg).await {
                    Ok(eval) => {
                        debug!(%group, %user, decisions = eval.decisions.len(), banned = eval.banned, "message evaluated")
                    }
                    Err(e) => {
                        warn!(%group, %user, error = %e, "message not evaluated");
                        stats.failed += 1;
                    }
                }
                if stats.messages % PRUNE_EVERY == 0 {
                    let dropped = service.prune_idle(msg.timestamp);
                    debug!(dropped, "pruned idle activity windows");
                }
            }
            FeedEvent::Admin(action) => {
                stats.admin_actions += 1;
                service.handle_admin(action).await;
            }
        }
    }

    info!(
        messages = stats.messages,
        admin = stats.admin_actions,
        rejected = stats.rejected,
        failed = stats.failed,
        "feed finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_and_admin_lines() {
        let ev = FeedEvent::parse(r#"{"type":"message","group":-1,"user":2,"text":"hi"}"#).unwrap();
        assert!(matches!(ev, FeedEvent::Message { link_count: None, timestamp: None, .. }));

        let ev = FeedEvent::parse(r#"{"type":"admin","action":"forgive","group":-1,"user":2}"#).unwrap();
        assert_eq!(
            ev,
            FeedEvent::Admin(AdminAction::Forgive { group: GroupId(-1), user: UserId(2), admin: None })
        );

        assert!(FeedEvent::parse(r#"{"type":"nope"}"#).is_err());
        assert!(FeedEvent::parse("not json").is_err());
    }

    #[test]
    fn link_count_falls_back_to_text() {
        let m = to_message(GroupId(1), UserId(1), Some("see https://a.io and t.me/chan".into()), None, None);
        assert_eq!(m.link_count, 2);

        let m = to_message(GroupId(1), UserId(1), Some("https://a.io".into()), Some(0), None);
        assert_eq!(m.link_count, 0);

        let m = to_message(GroupId(1), UserId(1), None, None, None);
        assert_eq!(m.link_count, 0);
    }
}
