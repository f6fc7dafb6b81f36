//! Directory of every chat the bot has received traffic from.
//!
//! This is the audience of a new broadcast: `/sbroadcast` targets all known
//! chats at the moment it is issued.

use {
    async_trait::async_trait,
    herald_broadcast::{TargetId, TargetResolver},
    herald_common::report::Reportable,
    serde::Serialize,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
    teloxide::types::Chat,
};

use crate::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Supergroup => "supergroup",
            Self::Channel => "channel",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "group" => Self::Group,
            "supergroup" => Self::Supergroup,
            "channel" => Self::Channel,
            _ => Self::Private,
        }
    }
}

/// One sighting of a chat, extracted from an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenChat {
    pub chat_id: i64,
    pub kind: ChatKind,
    pub title: Option<String>,
}

impl From<&Chat> for SeenChat {
    fn from(chat: &Chat) -> Self {
        let kind = if chat.is_channel() {
            ChatKind::Channel
        } else if chat.is_supergroup() {
            ChatKind::Supergroup
        } else if chat.is_group() {
            ChatKind::Group
        } else {
            ChatKind::Private
        };
        let title = chat
            .title()
            .or_else(|| chat.username())
            .or_else(|| chat.first_name())
            .map(str::to_string);
        Self {
            chat_id: chat.id.0,
            kind,
            title,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownChat {
    pub chat_id: i64,
    pub kind: ChatKind,
    pub title: Option<String>,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    pub message_count: u64,
}

pub struct ChatDirectory {
    pool: SqlitePool,
}

impl ChatDirectory {
    /// Open a directory with its own connection pool and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to SQLite")?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Use an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the chat or bump its counters.
    pub async fn record(&self, seen: &SeenChat, now_ms: u64) -> Result<()> {
        sqlx::query(
            "INSERT INTO telegram_chats (chat_id, kind, title, first_seen_ms, last_seen_ms, message_count)
             VALUES (?, ?, ?, ?, ?, 1)
             ON CONFLICT(chat_id) DO UPDATE SET
                kind = excluded.kind,
                title = COALESCE(excluded.title, telegram_chats.title),
                last_seen_ms = excluded.last_seen_ms,
                message_count = telegram_chats.message_count + 1",
        )
        .bind(seen.chat_id)
        .bind(seen.kind.as_str())
        .bind(&seen.title)
        .bind(now_ms as i64)
        .bind(now_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop a chat the bot can no longer reach. Returns whether it was known.
    pub async fn forget(&self, chat_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM telegram_chats WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM telegram_chats")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    /// Most recently active chats first.
    pub async fn list(&self, limit: usize) -> Result<Vec<KnownChat>> {
        let rows = sqlx::query(
            "SELECT chat_id, kind, title, first_seen_ms, last_seen_ms, message_count
             FROM telegram_chats
             ORDER BY last_seen_ms DESC, chat_id
             LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| KnownChat {
                chat_id: row.get("chat_id"),
                kind: ChatKind::parse(row.get::<&str, _>("kind")),
                title: row.get("title"),
                first_seen_ms: row.get::<i64, _>("first_seen_ms") as u64,
                last_seen_ms: row.get::<i64, _>("last_seen_ms") as u64,
                message_count: row.get::<i64, _>("message_count") as u64,
            })
            .collect())
    }
}

#[async_trait]
impl TargetResolver for ChatDirectory {
    async fn resolve_targets(&self) -> herald_broadcast::Result<Vec<TargetId>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT chat_id FROM telegram_chats")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(TargetId).collect())
    }
}

#[async_trait]
impl Reportable for ChatDirectory {
    fn name(&self) -> &'static str {
        "chats"
    }

    async fn report(&self) -> herald_common::Result<Vec<String>> {
        let count = self
            .count()
            .await
            .map_err(|e| herald_common::Error::external("chat count", e))?;
        Ok(vec![format!("Chats: {count} known")])
    }
}
