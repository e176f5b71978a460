//! Persistence interface
//!
//! The core reads and writes two tables, `infractions` and `messages`,
//! through the repo traits below. Batch operations are atomic per batch.
//! [`MemoryBackend`] is the in-process implementation used by tests and by
//! deployments that have not wired a durable store yet.

use crate::infraction::{Infraction, InfractionKind, NewInfraction};
use crate::message_cache::CachedMessage;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;

/// Errors returned by durable-store calls
#[derive(Debug, Error)]
pub enum PersistError {
    /// No row matched the given key
    #[error("row not found: {0}")]
    NotFound(String),

    /// The write conflicts with a row invariant (e.g. editing an archived
    /// infraction)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend failure (connection, statement, transaction)
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for durable-store operations
pub type PersistResult<T> = Result<T, PersistError>;

/// Row operations against the `infractions` table
#[async_trait]
pub trait InfractionRepo: Send + Sync {
    /// Insert a new row; the store assigns the per-guild integer id and the
    /// creation timestamp
    async fn insert(&self, new: NewInfraction) -> PersistResult<Infraction>;

    async fn get(&self, guild_id: u64, id: u64) -> PersistResult<Option<Infraction>>;

    /// The most recent non-archived mute for the target whose expiry is
    /// still in the future, if any
    async fn active_mute(&self, guild_id: u64, target_id: u64)
    -> PersistResult<Option<Infraction>>;

    /// Replace the reason; fails with [`PersistError::Conflict`] on an
    /// archived row
    async fn set_reason(
        &self,
        guild_id: u64,
        id: u64,
        reason: &str,
        updated_by: u64,
    ) -> PersistResult<Infraction>;

    /// Replace the expiry of a mute; fails with [`PersistError::Conflict`]
    /// on an archived row or a non-mute row
    async fn set_expiry(
        &self,
        guild_id: u64,
        id: u64,
        expires_at: chrono::DateTime<Utc>,
        updated_by: u64,
    ) -> PersistResult<Infraction>;

    /// Archive the row, making it immutable from then on
    async fn archive(&self, guild_id: u64, id: u64, archived_by: u64) -> PersistResult<Infraction>;
}

/// Row operations against the `messages` table
#[async_trait]
pub trait MessageRepo: Send + Sync {
    /// Insert a batch of rows; all-or-nothing
    async fn insert_batch(&self, rows: Vec<CachedMessage>) -> PersistResult<()>;

    async fn get(&self, message_id: u64) -> PersistResult<Option<CachedMessage>>;

    /// Update the stored content; a missing row is a no-op (edits to
    /// untracked or expired messages are expected)
    async fn set_content(&self, message_id: u64, content: &str) -> PersistResult<()>;

    /// Mark a row deleted and return it (UPDATE ... RETURNING); `None` when
    /// the row does not exist
    async fn mark_deleted(&self, message_id: u64) -> PersistResult<Option<CachedMessage>>;

    /// Mark a batch of rows deleted and return the rows that existed
    async fn mark_deleted_batch(&self, message_ids: &[u64]) -> PersistResult<Vec<CachedMessage>>;

    /// Mark up to `limit` not-yet-deleted rows in the channel (optionally
    /// filtered by author, excluding the given ids) as deleted and return
    /// their ids, newest first
    async fn claim_for_purge(
        &self,
        guild_id: u64,
        channel_id: u64,
        author_id: Option<u64>,
        exclude: &[u64],
        limit: usize,
    ) -> PersistResult<Vec<u64>>;
}

/// In-process backend for both tables
#[derive(Default)]
pub struct MemoryBackend {
    /// (guild id, infraction id) -> row
    infractions: DashMap<(u64, u64), Infraction>,
    /// guild id -> last assigned infraction id
    last_ids: DashMap<u64, u64>,
    messages: DashMap<u64, CachedMessage>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a message row directly, bypassing the cache (test setup for
    /// rows that were flushed before the process started)
    pub fn seed_message(&self, row: CachedMessage) {
        self.messages.insert(row.message_id, row);
    }

    fn next_id(&self, guild_id: u64) -> u64 {
        let mut last = self.last_ids.entry(guild_id).or_insert(0);
        *last += 1;
        *last
    }
}

#[async_trait]
impl InfractionRepo for MemoryBackend {
    async fn insert(&self, new: NewInfraction) -> PersistResult<Infraction> {
        let id = self.next_id(new.guild_id);
        let row = Infraction {
            id,
            guild_id: new.guild_id,
            target_id: new.target_id,
            executor_id: new.executor_id,
            kind: new.kind,
            reason: new.reason,
            request_author_id: new.request_author_id,
            flag: new.flag,
            created_at: Utc::now(),
            expires_at: new.expires_at,
            archived_at: None,
            archived_by: None,
            updated_at: None,
            updated_by: None,
        };
        self.infractions.insert((row.guild_id, id), row.clone());
        Ok(row)
    }

    async fn get(&self, guild_id: u64, id: u64) -> PersistResult<Option<Infraction>> {
        Ok(self
            .infractions
            .get(&(guild_id, id))
            .map(|entry| entry.value().clone()))
    }

    async fn active_mute(
        &self,
        guild_id: u64,
        target_id: u64,
    ) -> PersistResult<Option<Infraction>> {
        let now = Utc::now();
        Ok(self
            .infractions
            .iter()
            .filter(|entry| {
                let row = entry.value();
                row.guild_id == guild_id && row.target_id == target_id && row.mute_active_at(now)
            })
            .map(|entry| entry.value().clone())
            .max_by_key(|row| row.id))
    }

    async fn set_reason(
        &self,
        guild_id: u64,
        id: u64,
        reason: &str,
        updated_by: u64,
    ) -> PersistResult<Infraction> {
        let mut row = self
            .infractions
            .get_mut(&(guild_id, id))
            .ok_or_else(|| PersistError::NotFound(format!("infraction {guild_id}/{id}")))?;
        if row.is_archived() {
            return Err(PersistError::Conflict(format!(
                "infraction {id} is archived"
            )));
        }
        row.reason = Some(reason.chars().take(crate::infraction::REASON_MAX_LEN).collect());
        row.updated_at = Some(Utc::now());
        row.updated_by = Some(updated_by);
        Ok(row.clone())
    }

    async fn set_expiry(
        &self,
        guild_id: u64,
        id: u64,
        expires_at: chrono::DateTime<Utc>,
        updated_by: u64,
    ) -> PersistResult<Infraction> {
        let mut row = self
            .infractions
            .get_mut(&(guild_id, id))
            .ok_or_else(|| PersistError::NotFound(format!("infraction {guild_id}/{id}")))?;
        if row.is_archived() {
            return Err(PersistError::Conflict(format!(
                "infraction {id} is archived"
            )));
        }
        if row.kind != InfractionKind::Mute {
            return Err(PersistError::Conflict(format!(
                "infraction {id} is not a mute"
            )));
        }
        row.expires_at = Some(expires_at);
        row.updated_at = Some(Utc::now());
        row.updated_by = Some(updated_by);
        Ok(row.clone())
    }

    async fn archive(&self, guild_id: u64, id: u64, archived_by: u64) -> PersistResult<Infraction> {
        let mut row = self
            .infractions
            .get_mut(&(guild_id, id))
            .ok_or_else(|| PersistError::NotFound(format!("infraction {guild_id}/{id}")))?;
        if row.is_archived() {
            return Err(PersistError::Conflict(format!(
                "infraction {id} is already archived"
            )));
        }
        row.archived_at = Some(Utc::now());
        row.archived_by = Some(archived_by);
        Ok(row.clone())
    }
}

#[async_trait]
impl MessageRepo for MemoryBackend {
    async fn insert_batch(&self, rows: Vec<CachedMessage>) -> PersistResult<()> {
        for row in rows {
            self.messages.insert(row.message_id, row);
        }
        Ok(())
    }

    async fn get(&self, message_id: u64) -> PersistResult<Option<CachedMessage>> {
        Ok(self
            .messages
            .get(&message_id)
            .map(|entry| entry.value().clone()))
    }

    async fn set_content(&self, message_id: u64, content: &str) -> PersistResult<()> {
        if let Some(mut row) = self.messages.get_mut(&message_id) {
            row.content = Some(content.to_string());
        }
        Ok(())
    }

    async fn mark_deleted(&self, message_id: u64) -> PersistResult<Option<CachedMessage>> {
        Ok(self.messages.get_mut(&message_id).map(|mut row| {
            row.deleted = true;
            row.clone()
        }))
    }

    async fn mark_deleted_batch(&self, message_ids: &[u64]) -> PersistResult<Vec<CachedMessage>> {
        let mut rows = Vec::new();
        for id in message_ids {
            if let Some(mut row) = self.messages.get_mut(id) {
                row.deleted = true;
                rows.push(row.clone());
            }
        }
        Ok(rows)
    }

    async fn claim_for_purge(
        &self,
        guild_id: u64,
        channel_id: u64,
        author_id: Option<u64>,
        exclude: &[u64],
        limit: usize,
    ) -> PersistResult<Vec<u64>> {
        let mut candidates: Vec<(chrono::DateTime<Utc>, u64)> = self
            .messages
            .iter()
            .filter(|entry| {
                let row = entry.value();
                row.guild_id == guild_id
                    && row.channel_id == channel_id
                    && !row.deleted
                    && author_id.is_none_or(|author| row.author_id == author)
                    && !exclude.contains(&row.message_id)
            })
            .map(|entry| (entry.value().created_at, entry.value().message_id))
            .collect();
        candidates.sort_by(|a, b| b.cmp(a));

        let mut claimed = Vec::new();
        for (_, id) in candidates.into_iter().take(limit) {
            if let Some(mut row) = self.messages.get_mut(&id) {
                row.deleted = true;
                claimed.push(id);
            }
        }
        Ok(claimed)
    }
}
