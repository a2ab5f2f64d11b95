//! Conversation persistence
//!
//! The session controller only talks to the [`ConversationStore`] trait.
//! [`SqliteStore`] is the bundled implementation used by the CLI: one
//! SQLite file holding conversations, their messages and per-identity
//! token usage.

use crate::error::{NotestreamError, Result};
use crate::quota::QuotaLimits;
use crate::stream::TokenUsage;
use crate::transcript::{Message, Role};
use anyhow::Context;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

pub mod types;
pub use types::{ConversationSummary, UsageRecord};

/// Persistence collaborator of the session controller
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync + std::fmt::Debug {
    /// Create a conversation and return its id
    async fn create_conversation(&self, title: &str) -> Result<String>;

    /// Append one message and return its row id
    async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        tokens_used: u64,
    ) -> Result<i64>;

    /// Replace a conversation's title
    async fn update_title(&self, conversation_id: &str, title: &str) -> Result<()>;

    /// Account one turn's usage against the identity's quota.
    ///
    /// The usage is persisted even when the call fails with
    /// `NotestreamError::QuotaExceeded`.
    async fn record_token_usage(&self, identity: &str, usage: &TokenUsage) -> Result<u64>;

    /// Fail with `NotestreamError::QuotaExceeded` if the identity has no
    /// budget left
    async fn check_quota(&self, _identity: &str) -> Result<()> {
        Ok(())
    }

    /// All conversations, most recently updated first
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>>;

    /// Find a conversation by full id or unique id prefix
    async fn find_conversation(&self, id: &str) -> Result<Option<ConversationSummary>>;

    /// Messages of a conversation in insertion order
    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Delete a conversation and its messages. Returns false if nothing
    /// matched.
    async fn delete_conversation(&self, id: &str) -> Result<bool>;
}

fn storage_err(e: anyhow::Error) -> NotestreamError {
    NotestreamError::Storage(format!("{:#}", e))
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// SQLite backed conversation store
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
    quota: QuotaLimits,
}

impl SqliteStore {
    /// Create a store in the user's data directory
    ///
    /// `NOTESTREAM_HISTORY_DB` overrides the database path.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("NOTESTREAM_HISTORY_DB") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("com", "notestream", "notestream").ok_or_else(|| {
            NotestreamError::Storage("Could not determine data directory".into())
        })?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .context("Failed to create data directory")
            .map_err(storage_err)?;

        Self::new_with_path(data_dir.join("history.db"))
    }

    /// Create a store backed by the given database file
    ///
    /// # Examples
    ///
    /// ```
    /// use notestream::storage::SqliteStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = SqliteStore::new_with_path(dir.path().join("history.db")).unwrap();
    /// assert!(store.db_path().exists());
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(storage_err)?;
        }

        let store = Self {
            db_path,
            quota: QuotaLimits::unlimited(),
        };
        store.init()?;
        Ok(store)
    }

    /// Enforce the given token limits in `record_token_usage`
    pub fn with_quota(mut self, limits: QuotaLimits) -> Self {
        self.quota = limits;
        self
    }

    /// Path of the database file
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(storage_err)?;
        Ok(conn)
    }

    fn init(&self) -> Result<()> {
        let conn = self.open()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id);
            CREATE TABLE IF NOT EXISTS token_usage (
                identity TEXT PRIMARY KEY,
                total_tokens INTEGER NOT NULL,
                turns INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .context("Failed to create tables")
        .map_err(storage_err)?;

        Ok(())
    }

    /// Resolve a full id or an id prefix to one conversation id
    ///
    /// The prefix is compared literally; an empty prefix matches nothing.
    fn resolve_id(conn: &Connection, id: &str) -> Result<Option<String>> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(None);
        }
        if id.len() == 36 {
            let found = conn
                .query_row(
                    "SELECT id FROM conversations WHERE id = ?",
                    params![id],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .context("Failed to query conversation")
                .map_err(storage_err)?;
            return Ok(found);
        }

        let mut stmt = conn
            .prepare("SELECT id FROM conversations WHERE substr(id, 1, length(?1)) = ?1 LIMIT 2")
            .context("Failed to prepare statement")
            .map_err(storage_err)?;
        let matches: Vec<String> = stmt
            .query_map(params![id], |row| row.get(0))
            .context("Failed to query conversation")
            .map_err(storage_err)?
            .collect::<rusqlite::Result<_>>()
            .context("Failed to read conversation id")
            .map_err(storage_err)?;

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.into_iter().next()),
            _ => Err(NotestreamError::Storage(format!("Ambiguous conversation id prefix: {}", id)).into()),
        }
    }

    fn summary(conn: &Connection, id: &str) -> Result<Option<ConversationSummary>> {
        conn.query_row(
            "SELECT c.id, c.title, c.created_at, c.updated_at,
                    (SELECT count(*) FROM messages m WHERE m.conversation_id = c.id)
             FROM conversations c WHERE c.id = ?",
            params![id],
            |row| {
                let created_at: String = row.get(2)?;
                let updated_at: String = row.get(3)?;
                let count: i64 = row.get(4)?;
                Ok(ConversationSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: parse_timestamp(&created_at),
                    updated_at: parse_timestamp(&updated_at),
                    message_count: count as usize,
                })
            },
        )
        .optional()
        .context("Failed to query conversation")
        .map_err(|e| storage_err(e).into())
    }

    fn require_id(conn: &Connection, id: &str) -> Result<String> {
        Self::resolve_id(conn, id)?
            .ok_or_else(|| NotestreamError::UnknownConversation(id.to_string()).into())
    }

    /// Persisted usage of an identity
    ///
    /// # Examples
    ///
    /// ```
    /// use notestream::storage::{ConversationStore, SqliteStore};
    /// use notestream::stream::TokenUsage;
    ///
    /// # tokio_test::block_on(async {
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = SqliteStore::new_with_path(dir.path().join("history.db")).unwrap();
    ///
    /// store.record_token_usage("ada", &TokenUsage::new(3, 4)).await.unwrap();
    /// assert_eq!(store.usage("ada").unwrap().total_tokens, 7);
    /// # });
    /// ```
    pub fn usage(&self, identity: &str) -> Result<UsageRecord> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT total_tokens, turns FROM token_usage WHERE identity = ?",
                params![identity],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .context("Failed to query token usage")
            .map_err(storage_err)?;

        let (total, turns) = row.unwrap_or((0, 0));
        Ok(UsageRecord {
            identity: identity.to_string(),
            total_tokens: total.max(0) as u64,
            turns: turns.max(0) as u64,
        })
    }
}

#[async_trait::async_trait]
impl ConversationStore for SqliteStore {
    async fn create_conversation(&self, title: &str) -> Result<String> {
        let conn = self.open()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO conversations (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)",
            params![id, title, now, now],
        )
        .context("Failed to insert conversation")
        .map_err(storage_err)?;

        tracing::debug!("Created conversation {}", id);
        Ok(id)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        tokens_used: u64,
    ) -> Result<i64> {
        let mut conn = self.open()?;
        let now = Utc::now().to_rfc3339();

        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(storage_err)?;

        let id = Self::require_id(&tx, conversation_id)?;

        tx.execute(
            "INSERT INTO messages (conversation_id, role, content, tokens_used, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![id, role.as_str(), content, tokens_used as i64, now],
        )
        .context("Failed to insert message")
        .map_err(storage_err)?;
        let row_id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE conversations SET updated_at = ? WHERE id = ?",
            params![now, id],
        )
        .context("Failed to touch conversation")
        .map_err(storage_err)?;

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(storage_err)?;

        Ok(row_id)
    }

    async fn update_title(&self, conversation_id: &str, title: &str) -> Result<()> {
        let conn = self.open()?;
        let id = Self::require_id(&conn, conversation_id)?;

        conn.execute(
            "UPDATE conversations SET title = ?, updated_at = ? WHERE id = ?",
            params![title, Utc::now().to_rfc3339(), id],
        )
        .context("Failed to update title")
        .map_err(storage_err)?;

        Ok(())
    }

    async fn record_token_usage(&self, identity: &str, usage: &TokenUsage) -> Result<u64> {
        let persisted = self.usage(identity)?;
        let total = persisted.total_tokens.saturating_add(usage.total_tokens);

        let conn = self.open()?;
        conn.execute(
            "INSERT INTO token_usage (identity, total_tokens, turns, updated_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(identity) DO UPDATE SET
                total_tokens = ?2,
                turns = turns + 1,
                updated_at = ?3",
            params![identity, total as i64, Utc::now().to_rfc3339()],
        )
        .context("Failed to record token usage")
        .map_err(storage_err)?;

        tracing::debug!(identity, total, "Recorded token usage");
        self.quota.check_total(total)
    }

    async fn check_quota(&self, identity: &str) -> Result<()> {
        if self.quota.is_unlimited() {
            return Ok(());
        }
        let persisted = self.usage(identity)?;
        self.quota.check_available(persisted.total_tokens)
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let conn = self.open()?;

        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.title, c.created_at, c.updated_at,
                        (SELECT count(*) FROM messages m WHERE m.conversation_id = c.id)
                 FROM conversations c
                 ORDER BY c.updated_at DESC",
            )
            .context("Failed to prepare statement")
            .map_err(storage_err)?;

        let rows = stmt
            .query_map([], |row| {
                let created_at: String = row.get(2)?;
                let updated_at: String = row.get(3)?;
                let count: i64 = row.get(4)?;
                Ok(ConversationSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: parse_timestamp(&created_at),
                    updated_at: parse_timestamp(&updated_at),
                    message_count: count as usize,
                })
            })
            .context("Failed to query conversations")
            .map_err(storage_err)?;

        Ok(rows.flatten().collect())
    }

    async fn find_conversation(&self, id: &str) -> Result<Option<ConversationSummary>> {
        let conn = self.open()?;
        match Self::resolve_id(&conn, id)? {
            Some(full_id) => Self::summary(&conn, &full_id),
            None => Ok(None),
        }
    }

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.open()?;
        let id = Self::require_id(&conn, conversation_id)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, role, content, created_at FROM messages
                 WHERE conversation_id = ? ORDER BY id ASC",
            )
            .context("Failed to prepare statement")
            .map_err(storage_err)?;

        let rows = stmt
            .query_map(params![id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .context("Failed to query messages")
            .map_err(storage_err)?;

        let mut messages = Vec::new();
        for row in rows {
            let (row_id, role, content, created_at) = row
                .context("Failed to read message")
                .map_err(storage_err)?;
            let role: Role = role.parse()?;
            messages.push(Message::stored(
                row_id,
                role,
                content,
                parse_timestamp(&created_at),
            ));
        }

        Ok(messages)
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool> {
        let mut conn = self.open()?;
        let Some(full_id) = Self::resolve_id(&conn, id)? else {
            return Ok(false);
        };

        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(storage_err)?;
        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?",
            params![full_id],
        )
        .context("Failed to delete messages")
        .map_err(storage_err)?;
        tx.execute("DELETE FROM conversations WHERE id = ?", params![full_id])
            .context("Failed to delete conversation")
            .map_err(storage_err)?;
        tx.commit()
            .context("Failed to commit transaction")
            .map_err(storage_err)?;

        tracing::debug!("Deleted conversation {}", full_id);
        Ok(true)
    }
}
