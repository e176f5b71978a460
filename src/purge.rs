//! Purge/undo coordinator
//!
//! A purge claims eligible messages from the cache first and the durable
//! store second, bulk-deletes them, and stashes the claimed id list. The
//! platform's own delete log arrives as a separate, later event, so the
//! stashed record is how the coordinator recognises that log and appends
//! its permalink to the purge notice after the fact.

use crate::PURGE_TARGET;
use crate::error::ModerationResult;
use crate::persist::MessageRepo;
use crate::platform::PlatformActions;
use crate::registry::GuildState;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// The last purge in a guild. One slot per guild, overwritten by each new
/// purge: a second purge issued before the first's delete log arrives
/// costs the first its permalink. Known limitation.
#[derive(Debug, Clone)]
pub struct PurgeRecord {
    /// Author filter the purge ran with, if any
    pub target_id: Option<u64>,
    pub executor_id: u64,
    /// Every id claimed for this purge, newest first
    pub message_ids: Vec<u64>,
    /// (channel id, message id) of the purge notice, once sent
    pub notice: Option<(u64, u64)>,
}

/// Claims, deletes, and reconciles purge batches
pub struct PurgeCoordinator {
    platform: Arc<dyn PlatformActions>,
    messages: Arc<dyn MessageRepo>,
    records: DashMap<u64, PurgeRecord>,
}

impl PurgeCoordinator {
    #[must_use]
    pub fn new(platform: Arc<dyn PlatformActions>, messages: Arc<dyn MessageRepo>) -> Self {
        Self {
            platform,
            messages,
            records: DashMap::new(),
        }
    }

    /// Purge up to `amount` messages in the channel, optionally filtered by
    /// author. Returns the count the platform actually removed, which may
    /// be lower than the claimed count when some ids were already gone.
    pub async fn purge_messages(
        &self,
        state: &GuildState,
        channel_id: u64,
        amount: usize,
        executor_id: u64,
        target_id: Option<u64>,
    ) -> ModerationResult<usize> {
        let mut claimed: Vec<u64> = state
            .messages
            .get_eligible_for_purge(channel_id, target_id, amount)
            .into_iter()
            .map(|row| row.message_id)
            .collect();

        if claimed.len() < amount {
            let remaining = amount - claimed.len();
            let from_store = self
                .messages
                .claim_for_purge(state.guild_id, channel_id, target_id, &claimed, remaining)
                .await?;
            claimed.extend(from_store);
        }

        self.records.insert(
            state.guild_id,
            PurgeRecord {
                target_id,
                executor_id,
                message_ids: claimed.clone(),
                notice: None,
            },
        );

        if claimed.is_empty() {
            return Ok(0);
        }

        let removed = self
            .platform
            .bulk_delete_messages(channel_id, &claimed)
            .await?;

        info!(
            target: PURGE_TARGET,
            guild_id = %state.guild_id,
            channel_id = %channel_id,
            executor_id = %executor_id,
            claimed = claimed.len(),
            removed,
            "Purged messages"
        );
        Ok(removed)
    }

    /// Remember where the purge notice was sent, so a later delete log can
    /// be appended to it
    pub fn set_purge_notice(&self, guild_id: u64, channel_id: u64, message_id: u64) {
        if let Some(mut record) = self.records.get_mut(&guild_id) {
            record.notice = Some((channel_id, message_id));
        }
    }

    /// Reconcile an asynchronous delete-log event against the stashed
    /// record. When the deleted id belongs to the last purge, the permalink
    /// is appended to the purge notice and the record is consumed. Returns
    /// whether the event matched.
    pub async fn attach_delete_log(
        &self,
        guild_id: u64,
        deleted_message_id: u64,
        permalink: &str,
    ) -> bool {
        let matched = self
            .records
            .get(&guild_id)
            .is_some_and(|record| record.message_ids.contains(&deleted_message_id));
        if !matched {
            return false;
        }

        // Consume exactly once
        let Some((_, record)) = self.records.remove(&guild_id) else {
            return false;
        };

        if let Some((channel_id, notice_id)) = record.notice {
            if let Err(error) = self
                .platform
                .append_to_message(channel_id, notice_id, &format!("\n{permalink}"))
                .await
            {
                warn!(
                    target: PURGE_TARGET,
                    guild_id = %guild_id,
                    error = %error,
                    "Failed to append delete-log permalink to purge notice"
                );
            }
        }
        true
    }

    /// The stashed record for the guild's most recent purge, if any
    #[must_use]
    pub fn last_purge(&self, guild_id: u64) -> Option<PurgeRecord> {
        self.records.get(&guild_id).map(|record| record.clone())
    }
}
