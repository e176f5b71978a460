//! Per-guild message cache
//!
//! Messages are high-volume and short-lived, so the hot window stays in
//! memory and is periodically flushed to the durable store. Every operation
//! behaves the same, from the caller's point of view, whether the row is
//! resident or was already flushed: non-resident rows fall through to the
//! store via the shared [`MessageCache::lookup`] helper.

use crate::CACHE_TARGET;
use crate::persist::{MessageRepo, PersistResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

/// Maximum stored content length, in characters
pub const CONTENT_MAX_LEN: usize = 1024;

/// Crop content to [`CONTENT_MAX_LEN`] characters, appending a
/// `...(N more characters)` marker when anything was dropped. Cropping is
/// one-way; content is never "uncropped" later.
#[must_use]
pub fn crop_content(content: &str) -> String {
    let total = content.chars().count();
    if total <= CONTENT_MAX_LEN {
        return content.to_owned();
    }

    // The digit count of N shifts the split point, so settle it in a
    // second pass.
    let mut dropped = total - CONTENT_MAX_LEN;
    for _ in 0..2 {
        let marker = format!("...({dropped} more characters)");
        let keep = CONTENT_MAX_LEN.saturating_sub(marker.chars().count());
        if total - keep == dropped {
            let mut cropped: String = content.chars().take(keep).collect();
            cropped.push_str(&marker);
            return cropped;
        }
        dropped = total - keep;
    }

    let marker = format!("...({dropped} more characters)");
    let keep = CONTENT_MAX_LEN.saturating_sub(marker.chars().count());
    let mut cropped: String = content.chars().take(keep).collect();
    cropped.push_str(&marker);
    cropped
}

/// One tracked message, resident in cache or persisted in the `messages`
/// table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMessage {
    /// Message id, unique within a guild
    pub message_id: u64,
    pub author_id: u64,
    pub channel_id: u64,
    pub guild_id: u64,
    pub created_at: DateTime<Utc>,
    pub content: Option<String>,
    /// Id of the message this one replies to
    pub reference_id: Option<u64>,
    /// Parent channel/folder id
    pub category_id: Option<u64>,
    pub sticker_id: Option<u64>,
    /// Once true, never reverts
    pub deleted: bool,
}

impl CachedMessage {
    /// Build a new row with cropped content
    #[must_use]
    pub fn new(
        message_id: u64,
        author_id: u64,
        channel_id: u64,
        guild_id: u64,
        created_at: DateTime<Utc>,
        content: Option<&str>,
    ) -> Self {
        Self {
            message_id,
            author_id,
            channel_id,
            guild_id,
            created_at,
            content: content.map(crop_content),
            reference_id: None,
            category_id: None,
            sticker_id: None,
            deleted: false,
        }
    }

    #[must_use]
    pub fn replying_to(mut self, reference_id: u64) -> Self {
        self.reference_id = Some(reference_id);
        self
    }

    #[must_use]
    pub fn in_category(mut self, category_id: u64) -> Self {
        self.category_id = Some(category_id);
        self
    }

    #[must_use]
    pub fn with_sticker(mut self, sticker_id: u64) -> Self {
        self.sticker_id = Some(sticker_id);
        self
    }
}

/// Result of [`MessageCache::mark_deleted`]: the deleted row and, when
/// requested, the row it replied to. Both are `None` when never tracked.
#[derive(Debug, Clone, Default)]
pub struct DeletedMessage {
    pub message: Option<CachedMessage>,
    pub reference: Option<CachedMessage>,
}

/// Bounded in-memory working set of one guild's recent messages
pub struct MessageCache {
    guild_id: u64,
    resident: DashMap<u64, CachedMessage>,
    repo: Arc<dyn MessageRepo>,
}

impl MessageCache {
    #[must_use]
    pub fn new(guild_id: u64, repo: Arc<dyn MessageRepo>) -> Self {
        Self {
            guild_id,
            resident: DashMap::new(),
            repo,
        }
    }

    #[must_use]
    pub fn guild_id(&self) -> u64 {
        self.guild_id
    }

    /// Number of rows currently resident
    #[must_use]
    pub fn resident_len(&self) -> usize {
        self.resident.len()
    }

    /// Insert a freshly created message; silently overwrites a duplicate id
    pub fn record_created(&self, message: CachedMessage) {
        self.resident.insert(message.message_id, message);
    }

    /// Cache-first, store-fallback read
    pub async fn lookup(&self, message_id: u64) -> PersistResult<Option<CachedMessage>> {
        if let Some(row) = self.resident.get(&message_id) {
            return Ok(Some(row.clone()));
        }
        self.repo.get(message_id).await
    }

    /// Apply an edit. Resident rows mutate in place; evicted rows update
    /// the store directly; an untracked id is a no-op.
    pub async fn record_edited(&self, message_id: u64, new_content: &str) -> PersistResult<()> {
        let cropped = crop_content(new_content);
        if let Some(mut row) = self.resident.get_mut(&message_id) {
            row.content = Some(cropped);
            return Ok(());
        }
        self.repo.set_content(message_id, &cropped).await
    }

    /// Flag a message deleted, resolving the replied-to message as well
    /// when `wants_reference_lookup` is set.
    pub async fn mark_deleted(
        &self,
        message_id: u64,
        wants_reference_lookup: bool,
    ) -> PersistResult<DeletedMessage> {
        let message = if let Some(mut row) = self.resident.get_mut(&message_id) {
            row.deleted = true;
            Some(row.clone())
        } else {
            self.repo.mark_deleted(message_id).await?
        };

        let reference = if wants_reference_lookup {
            match message.as_ref().and_then(|row| row.reference_id) {
                Some(reference_id) => self.lookup(reference_id).await?,
                None => None,
            }
        } else {
            None
        };

        Ok(DeletedMessage { message, reference })
    }

    /// Flag a batch of messages deleted and return the affected rows,
    /// without double-counting an id across the resident and store paths.
    pub async fn mark_bulk_deleted(
        &self,
        message_ids: &HashSet<u64>,
    ) -> PersistResult<Vec<CachedMessage>> {
        let mut seen: HashMap<u64, CachedMessage> = HashMap::new();
        let mut evicted = Vec::new();

        for &id in message_ids {
            if let Some(mut row) = self.resident.get_mut(&id) {
                row.deleted = true;
                seen.insert(id, row.clone());
            } else {
                evicted.push(id);
            }
        }

        if !evicted.is_empty() {
            for row in self.repo.mark_deleted_batch(&evicted).await? {
                seen.entry(row.message_id).or_insert(row);
            }
        }

        Ok(seen.into_values().collect())
    }

    /// Claim up to `limit` not-yet-deleted resident messages in the
    /// channel, newest first, flagging each deleted as a side effect.
    /// Consume-on-read: a second call returns a disjoint set.
    pub fn get_eligible_for_purge(
        &self,
        channel_id: u64,
        author_id: Option<u64>,
        limit: usize,
    ) -> Vec<CachedMessage> {
        let mut candidates: Vec<(DateTime<Utc>, u64)> = self
            .resident
            .iter()
            .filter(|entry| {
                let row = entry.value();
                row.channel_id == channel_id
                    && !row.deleted
                    && author_id.is_none_or(|author| row.author_id == author)
            })
            .map(|entry| (entry.value().created_at, entry.value().message_id))
            .collect();
        candidates.sort_by(|a, b| b.cmp(a));

        let mut claimed = Vec::new();
        for (_, id) in candidates {
            if claimed.len() == limit {
                break;
            }
            // Re-check under the write guard; another task may have
            // claimed the row since the scan.
            if let Some(mut row) = self.resident.get_mut(&id) {
                if !row.deleted {
                    row.deleted = true;
                    claimed.push(row.clone());
                }
            }
        }
        claimed
    }

    /// Flush every resident row to the durable store and evict the flushed
    /// rows. Snapshot-then-clear: rows created while the batch insert is in
    /// flight stay resident for the next flush, and so does any row edited
    /// or deleted mid-flight — its stale snapshot copy is what got
    /// persisted, so evicting it would lose the mutation.
    pub async fn flush(&self) -> PersistResult<usize> {
        let snapshot: Vec<CachedMessage> = self
            .resident
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        if snapshot.is_empty() {
            return Ok(0);
        }

        self.repo.insert_batch(snapshot.clone()).await?;

        for row in &snapshot {
            // Evict only if the row is still exactly what was persisted
            self.resident
                .remove_if(&row.message_id, |_, live| live == row);
        }

        info!(
            target: CACHE_TARGET,
            guild_id = %self.guild_id,
            flushed = snapshot.len(),
            "Flushed message cache to durable store"
        );
        Ok(snapshot.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryBackend;
    use async_trait::async_trait;
    use chrono::Duration;
    use tokio::sync::Semaphore;

    fn cache() -> (MessageCache, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (MessageCache::new(1, backend.clone()), backend)
    }

    fn msg(id: u64, channel: u64, author: u64, age_secs: i64) -> CachedMessage {
        CachedMessage::new(
            id,
            author,
            channel,
            1,
            Utc::now() - Duration::seconds(age_secs),
            Some("hello"),
        )
    }

    #[test]
    fn test_crop_content() {
        assert_eq!(crop_content("short"), "short");

        let exactly = "x".repeat(CONTENT_MAX_LEN);
        assert_eq!(crop_content(&exactly), exactly);

        let long = "y".repeat(CONTENT_MAX_LEN + 500);
        let cropped = crop_content(&long);
        assert!(cropped.chars().count() <= CONTENT_MAX_LEN);
        assert!(cropped.ends_with("more characters)"));
        assert!(cropped.starts_with("yyy"));
    }

    #[tokio::test]
    async fn test_edit_round_trip_resident_and_evicted() {
        let (cache, _) = cache();
        cache.record_created(msg(100, 5, 9, 0));

        cache.record_edited(100, "new text").await.unwrap();
        let row = cache.lookup(100).await.unwrap().unwrap();
        assert_eq!(row.content.as_deref(), Some("new text"));

        // Same two operations against an evicted row
        cache.flush().await.unwrap();
        assert_eq!(cache.resident_len(), 0);

        cache.record_edited(100, "newer text").await.unwrap();
        let row = cache.lookup(100).await.unwrap().unwrap();
        assert_eq!(row.content.as_deref(), Some("newer text"));
    }

    #[tokio::test]
    async fn test_edit_untracked_is_noop() {
        let (cache, _) = cache();
        cache.record_edited(404, "whatever").await.unwrap();
        assert!(cache.lookup(404).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_deleted_with_reference_lookup() {
        let (cache, _) = cache();
        cache.record_created(msg(1, 5, 9, 10));
        cache.record_created(msg(2, 5, 9, 0).replying_to(1));

        let result = cache.mark_deleted(2, true).await.unwrap();
        let deleted = result.message.unwrap();
        assert!(deleted.deleted);
        assert_eq!(result.reference.unwrap().message_id, 1);
    }

    #[tokio::test]
    async fn test_mark_deleted_evicted_reference() {
        let (cache, backend) = cache();
        // The replied-to row was flushed before the process saw the delete
        backend.seed_message(msg(1, 5, 9, 60));
        cache.record_created(msg(2, 5, 9, 0).replying_to(1));
        cache.flush().await.unwrap();

        let result = cache.mark_deleted(2, true).await.unwrap();
        assert!(result.message.unwrap().deleted);
        assert_eq!(result.reference.unwrap().message_id, 1);

        // Never-seen id: same return shape, both sides empty
        let result = cache.mark_deleted(404, true).await.unwrap();
        assert!(result.message.is_none());
        assert!(result.reference.is_none());
    }

    #[tokio::test]
    async fn test_mark_bulk_deleted_mixed_residency() {
        let (cache, backend) = cache();
        cache.record_created(msg(1, 5, 9, 0));
        backend.seed_message(msg(2, 5, 9, 30));

        let ids: HashSet<u64> = [1, 2, 404].into_iter().collect();
        let rows = cache.mark_bulk_deleted(&ids).await.unwrap();

        assert_eq!(rows.len(), 2);
        let mut found: Vec<u64> = rows.iter().map(|row| row.message_id).collect();
        found.sort_unstable();
        assert_eq!(found, vec![1, 2]);
        assert!(rows.iter().all(|row| row.deleted));
    }

    #[tokio::test]
    async fn test_eligible_for_purge_is_consume_on_read() {
        let (cache, _) = cache();
        for id in 1..=8 {
            cache.record_created(msg(id, 5, 9, 100 - i64::try_from(id).unwrap()));
        }
        cache.record_created(msg(50, 6, 9, 0)); // other channel
        cache.record_created(msg(51, 5, 7, 0)); // other author

        let first = cache.get_eligible_for_purge(5, Some(9), 5);
        assert_eq!(first.len(), 5);
        assert!(first.iter().all(|row| row.channel_id == 5 && row.deleted));
        // Newest first
        let ids: Vec<u64> = first.iter().map(|row| row.message_id).collect();
        assert_eq!(ids, vec![8, 7, 6, 5, 4]);

        let second = cache.get_eligible_for_purge(5, Some(9), 5);
        assert_eq!(second.len(), 3);
        let overlap = second
            .iter()
            .filter(|row| ids.contains(&row.message_id))
            .count();
        assert_eq!(overlap, 0);
    }

    #[tokio::test]
    async fn test_flush_clears_only_snapshot() {
        let (cache, backend) = cache();
        cache.record_created(msg(1, 5, 9, 10));
        cache.record_created(msg(2, 5, 9, 5));

        let flushed = cache.flush().await.unwrap();
        assert_eq!(flushed, 2);
        assert_eq!(cache.resident_len(), 0);
        assert!(backend.get(1).await.unwrap().is_some());

        // Rows arriving after a flush stay resident until the next one
        cache.record_created(msg(3, 5, 9, 0));
        assert_eq!(cache.resident_len(), 1);
        assert_eq!(cache.flush().await.unwrap(), 1);
    }

    /// Repo whose batch insert waits for a permit, holding a flush
    /// suspended mid-flight
    struct GatedBackend {
        inner: Arc<MemoryBackend>,
        gate: Semaphore,
    }

    #[async_trait]
    impl MessageRepo for GatedBackend {
        async fn insert_batch(&self, rows: Vec<CachedMessage>) -> PersistResult<()> {
            let _permit = self.gate.acquire().await.unwrap();
            self.inner.insert_batch(rows).await
        }

        async fn get(&self, message_id: u64) -> PersistResult<Option<CachedMessage>> {
            self.inner.get(message_id).await
        }

        async fn set_content(&self, message_id: u64, content: &str) -> PersistResult<()> {
            self.inner.set_content(message_id, content).await
        }

        async fn mark_deleted(&self, message_id: u64) -> PersistResult<Option<CachedMessage>> {
            self.inner.mark_deleted(message_id).await
        }

        async fn mark_deleted_batch(
            &self,
            message_ids: &[u64],
        ) -> PersistResult<Vec<CachedMessage>> {
            self.inner.mark_deleted_batch(message_ids).await
        }

        async fn claim_for_purge(
            &self,
            guild_id: u64,
            channel_id: u64,
            author_id: Option<u64>,
            exclude: &[u64],
            limit: usize,
        ) -> PersistResult<Vec<u64>> {
            self.inner
                .claim_for_purge(guild_id, channel_id, author_id, exclude, limit)
                .await
        }
    }

    #[tokio::test]
    async fn test_flush_keeps_rows_mutated_mid_flight() {
        let inner = Arc::new(MemoryBackend::new());
        let repo = Arc::new(GatedBackend {
            inner: inner.clone(),
            gate: Semaphore::new(0),
        });
        let cache = Arc::new(MessageCache::new(1, repo.clone()));
        cache.record_created(msg(1, 5, 9, 10));
        cache.record_created(msg(2, 5, 9, 5));
        cache.record_created(msg(3, 5, 9, 0));

        let in_flight = cache.clone();
        let flush = tokio::spawn(async move { in_flight.flush().await });
        // Let the flush take its snapshot and suspend on the batch insert
        tokio::task::yield_now().await;

        // Mutations landing while the insert is in flight
        let deleted = cache.mark_deleted(1, false).await.unwrap();
        assert!(deleted.message.unwrap().deleted);
        cache.record_edited(2, "edited mid-flight").await.unwrap();

        repo.gate.add_permits(1);
        assert_eq!(flush.await.unwrap().unwrap(), 3);

        // The untouched row was evicted; the mutated rows stay resident
        assert_eq!(cache.resident_len(), 2);
        assert!(inner.get(3).await.unwrap().is_some());

        // Neither mutation was lost from the caller's point of view
        assert!(cache.lookup(1).await.unwrap().unwrap().deleted);
        assert_eq!(
            cache.lookup(2).await.unwrap().unwrap().content.as_deref(),
            Some("edited mid-flight")
        );

        // The next flush persists the mutations over the stale rows
        repo.gate.add_permits(1);
        assert_eq!(cache.flush().await.unwrap(), 2);
        assert!(inner.get(1).await.unwrap().unwrap().deleted);
        assert_eq!(
            inner.get(2).await.unwrap().unwrap().content.as_deref(),
            Some("edited mid-flight")
        );
    }
}
