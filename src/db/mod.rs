//! Read-only adapter over the product's Postgres tables.
//!
//! Expected tables (owned and migrated by the admin side, not by us):
//!   group_settings(id, chat_id, spam_limit, spam_interval, repeat_limit,
//!                  repeat_interval, link_spam_limit, link_spam_enabled)
//!   keywords(id, group_id, phrase, response_text, response_file_id,
//!            response_file_type, is_pattern, case_sensitive,
//!            transliterate_enabled, fuzzy_enabled)

use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, Pool, Postgres, Row};
use tracing::warn;

use crate::matcher::escape_glob;
use crate::model::{GroupConfig, GroupId, Keyword, MediaKind, Response};
use crate::store::{KeywordStore, PolicyStore};

pub type Db = Pool<Postgres>;

pub async fn connect(url: &str, max: Option<u32>) -> Result<Db> {
    let pool = PgPoolOptions::new()
        .max_connections(max.unwrap_or(10))
        .connect(url)
        .await?;

    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn connect(url: &str, max: Option<u32>) -> Result<Self> {
        Ok(Self::new(connect(url, max).await?))
    }
}

/// Columns of one `keywords` row.
#[derive(Debug, Clone, Default)]
pub struct KeywordRow {
    pub id: i64,
    pub phrase: String,
    pub response_text: Option<String>,
    pub response_file_id: Option<String>,
    pub response_file_type: Option<String>,
    pub is_pattern: bool,
    pub case_sensitive: bool,
    pub transliterate_enabled: bool,
    pub fuzzy_enabled: bool,
}

/// Turn a stored row into a [`Keyword`].
///
/// Rows not flagged as patterns get their wildcards escaped, so `?` in
/// "how are you?" stays a question mark. Rows without a usable response are
/// dropped.
pub fn keyword_from_row(row: KeywordRow) -> Option<Keyword> {
    let response = match (row.response_text, row.response_file_id, row.response_file_type) {
        (Some(text), _, _) if !text.trim().is_empty() => Response::Text { text },
        (_, Some(file_id), Some(kind)) => {
            let kind = match kind.as_str() {
                "photo" => MediaKind::Photo,
                "video" => MediaKind::Video,
                "document" => MediaKind::Document,
                _ => return None,
            };
            Response::Media { file_id, kind }
        }
        _ => return None,
    };

    let phrase = if row.is_pattern {
        row.phrase
    } else {
        escape_glob(&row.phrase)
    };

    Some(Keyword {
        id: row.id,
        phrase,
        response,
        case_sensitive: row.case_sensitive,
        fuzzy: row.fuzzy_enabled,
        transliterate: row.transliterate_enabled,
    })
}

fn non_negative(v: i32) -> u32 {
    u32::try_from(v).unwrap_or(0)
}

fn policy_from_row(row: &PgRow) -> Result<GroupConfig> {
    let interval = u64::from(non_negative(row.try_get::<i32, _>("spam_interval")?));
    let cfg = GroupConfig {
        message_limit: non_negative(row.try_get("spam_limit")?),
        message_window_secs: interval,
        repeat_limit: non_negative(row.try_get("repeat_limit")?),
        repeat_window_secs: u64::from(non_negative(row.try_get("repeat_interval")?)),
        link_limit: non_negative(row.try_get("link_spam_limit")?),
        // tabela nie ma osobnego okna dla linków
        link_window_secs: interval,
        link_spam_enabled: row.try_get("link_spam_enabled")?,
        ..GroupConfig::default()
    };
    Ok(cfg.sanitized())
}

impl KeywordStore for PgStore {
    async fn list_keywords(&self, group: GroupId) -> Result<Vec<Keyword>> {
        let rows = sqlx::query(
            r#"
            SELECT k.id, k.phrase, k.response_text, k.response_file_id, k.response_file_type,
                   k.is_pattern, k.case_sensitive, k.transliterate_enabled, k.fuzzy_enabled
              FROM keywords k
              JOIN group_settings g ON g.id = k.group_id
             WHERE g.chat_id = $1
             ORDER BY k.id
            "#,
        )
        .bind(group.0)
        .fetch_all(&self.db)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let row = KeywordRow {
                id: i64::from(r.try_get::<i32, _>("id")?),
                phrase: r.try_get("phrase")?,
                response_text: r.try_get("response_text")?,
                response_file_id: r.try_get("response_file_id")?,
                response_file_type: r.try_get("response_file_type")?,
                is_pattern: r.try_get("is_pattern")?,
                case_sensitive: r.try_get("case_sensitive")?,
                transliterate_enabled: r.try_get("transliterate_enabled")?,
                fuzzy_enabled: r.try_get("fuzzy_enabled")?,
            };
            let id = row.id;
            match keyword_from_row(row) {
                Some(kw) => out.push(kw),
                None => warn!(%group, keyword_id = id, "keyword without usable response skipped"),
            }
        }
        Ok(out)
    }
}

impl PolicyStore for PgStore {
    async fn get_policy(&self, group: GroupId) -> Result<Option<GroupConfig>> {
        let row = sqlx::query(
            r#"
            SELECT spam_limit, spam_interval, repeat_limit, repeat_interval,
                   link_spam_limit, link_spam_enabled
              FROM group_settings
             WHERE chat_id = $1
            "#,
        )
        .bind(group.0)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(policy_from_row).transpose()
    }
}
