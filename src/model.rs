// src/model.rs
//! Plain data shared by the matcher, the limiter and the escalator.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat (group) identifier as handed over by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i64);

/// Platform user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-(group, user) key used by every stateful component.
pub type MemberKey = (GroupId, UserId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
}

/// What gets sent back when a keyword fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Text { text: String },
    /// Reference to media already uploaded to the platform (file id).
    Media { file_id: String, kind: MediaKind },
}

/// Keyword definition as read from the keyword store.
///
/// `phrase` is a glob: `*` matches any run, `?` a single character and `\`
/// escapes the next character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub id: i64,
    pub phrase: String,
    pub response: Response,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub fuzzy: bool,
    #[serde(default)]
    pub transliterate: bool,
}

impl Keyword {
    /// Text keyword with all tolerance flags off.
    pub fn text(id: i64, phrase: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            id,
            phrase: phrase.into(),
            response: Response::Text { text: reply.into() },
            case_sensitive: false,
            fuzzy: false,
            transliterate: false,
        }
    }

    pub fn with_fuzzy(mut self) -> Self {
        self.fuzzy = true;
        self
    }

    pub fn with_transliteration(mut self) -> Self {
        self.transliterate = true;
        self
    }

    pub fn with_case_sensitivity(mut self) -> Self {
        self.case_sensitive = true;
        self
    }
}

/// Upper bound for any counting window (one day).
pub const MAX_WINDOW_SECS: u64 = 86_400;

/// Per-group anti-spam thresholds. Windows are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub message_limit: u32,
    pub message_window_secs: u64,
    pub repeat_limit: u32,
    pub repeat_window_secs: u64,
    pub link_limit: u32,
    pub link_window_secs: u64,
    pub link_spam_enabled: bool,
    /// Ban on message flood; when off an exceeded limit only warns.
    pub auto_ban_flood: bool,
    /// Ban on repeated content; when off an exceeded limit only warns.
    pub auto_ban_repeats: bool,
    /// Drop keyword replies for users under an active ban.
    pub suppress_banned_replies: bool,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            message_limit: 5,
            message_window_secs: 10,
            repeat_limit: 3,
            repeat_window_secs: 10,
            link_limit: 3,
            link_window_secs: 10,
            link_spam_enabled: true,
            auto_ban_flood: true,
            auto_ban_repeats: true,
            suppress_banned_replies: true,
        }
    }
}

impl GroupConfig {
    /// Clamp values coming from admins/storage into a usable range:
    /// limits are at least 1, windows lie in `1..=MAX_WINDOW_SECS`.
    pub fn sanitized(mut self) -> Self {
        self.message_limit = self.message_limit.max(1);
        self.repeat_limit = self.repeat_limit.max(1);
        self.link_limit = self.link_limit.max(1);
        self.message_window_secs = self.message_window_secs.clamp(1, MAX_WINDOW_SECS);
        self.repeat_window_secs = self.repeat_window_secs.clamp(1, MAX_WINDOW_SECS);
        self.link_window_secs = self.link_window_secs.clamp(1, MAX_WINDOW_SECS);
        self
    }

    pub fn limit_for(&self, kind: LimitKind) -> u32 {
        match kind {
            LimitKind::Message => self.message_limit,
            LimitKind::Link => self.link_limit,
            LimitKind::RepeatedContent => self.repeat_limit,
        }
    }

    pub fn window_for(&self, kind: LimitKind) -> chrono::Duration {
        let secs = match kind {
            LimitKind::Message => self.message_window_secs,
            LimitKind::Link => self.link_window_secs,
            LimitKind::RepeatedContent => self.repeat_window_secs,
        };
        chrono::Duration::try_seconds(secs.min(MAX_WINDOW_SECS) as i64)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Whether exceeding `kind` leads to a ban rather than a warning.
    pub fn auto_ban(&self, kind: LimitKind) -> bool {
        match kind {
            LimitKind::Message => self.auto_ban_flood,
            LimitKind::Link => self.link_spam_enabled,
            LimitKind::RepeatedContent => self.auto_ban_repeats,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Message,
    Link,
    RepeatedContent,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LimitKind::Message => "message",
            LimitKind::Link => "link",
            LimitKind::RepeatedContent => "repeated_content",
        };
        f.write_str(s)
    }
}

/// Incoming chat message with the facts the engine needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub group: GroupId,
    pub user: UserId,
    /// `None` for non-text content (stickers, media without caption...).
    #[serde(default)]
    pub text: Option<String>,
    /// Number of links found in the message by the intake.
    #[serde(default)]
    pub link_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl IncomingMessage {
    /// Build a message and count its links with the default scanner.
    pub fn new(group: GroupId, user: UserId, text: Option<String>, timestamp: DateTime<Utc>) -> Self {
        let link_count = text.as_deref().map(crate::links::count_links).unwrap_or(0);
        Self {
            group,
            user,
            text,
            link_count,
            timestamp,
        }
    }

    pub fn key(&self) -> MemberKey {
        (self.group, self.user)
    }
}
