//! Infraction data model
//!
//! An infraction is a persisted moderation action with provenance. Rows are
//! append-mostly: reason and duration may be edited after the fact, a row
//! may be archived, and an archived row is immutable. Rows are never
//! hard-deleted.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Maximum length of a stored reason, in characters
pub const REASON_MAX_LEN: usize = 1024;

/// The kind of moderation action an infraction records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum InfractionKind {
    Note,
    Mute,
    Kick,
    Ban,
    Unban,
    Unmute,
}

/// How an infraction came to exist, beyond a plain command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum InfractionFlag {
    /// Recorded from the platform's audit log, not applied by the bot
    Automatic,
    /// Applied via the one-click reaction shortcut
    Quick,
}

/// A persisted moderation action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Infraction {
    /// Integer id, unique per guild
    pub id: u64,
    pub guild_id: u64,
    pub target_id: u64,
    pub executor_id: u64,
    pub kind: InfractionKind,
    pub reason: Option<String>,
    /// Who filed the originating request, when one exists
    pub request_author_id: Option<u64>,
    pub flag: Option<InfractionFlag>,
    pub created_at: DateTime<Utc>,
    /// Set at creation iff `kind` is `Mute`
    pub expires_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub archived_by: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<u64>,
}

impl Infraction {
    /// An archived infraction can no longer be edited
    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Whether this row is a mute still in force at `now`
    #[must_use]
    pub fn mute_active_at(&self, now: DateTime<Utc>) -> bool {
        self.kind == InfractionKind::Mute
            && !self.is_archived()
            && self.expires_at.is_some_and(|expires| expires > now)
    }
}

/// Input for creating an infraction; the store assigns the per-guild id
/// and the creation timestamp.
#[derive(Debug, Clone)]
pub struct NewInfraction {
    pub guild_id: u64,
    pub target_id: u64,
    pub executor_id: u64,
    pub kind: InfractionKind,
    pub reason: Option<String>,
    pub request_author_id: Option<u64>,
    pub flag: Option<InfractionFlag>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewInfraction {
    #[must_use]
    pub fn new(guild_id: u64, target_id: u64, executor_id: u64, kind: InfractionKind) -> Self {
        Self {
            guild_id,
            target_id,
            executor_id,
            kind,
            reason: None,
            request_author_id: None,
            flag: None,
            expires_at: None,
        }
    }

    /// Attach a reason, capped at [`REASON_MAX_LEN`] characters
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        let reason: String = reason.into();
        self.reason = Some(if reason.chars().count() > REASON_MAX_LEN {
            reason.chars().take(REASON_MAX_LEN).collect()
        } else {
            reason
        });
        self
    }

    #[must_use]
    pub fn with_request_author(mut self, request_author_id: u64) -> Self {
        self.request_author_id = Some(request_author_id);
        self
    }

    #[must_use]
    pub fn with_flag(mut self, flag: InfractionFlag) -> Self {
        self.flag = Some(flag);
        self
    }

    /// Set the expiry; only meaningful for mutes
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn mute_row(expires_at: Option<DateTime<Utc>>) -> Infraction {
        Infraction {
            id: 1,
            guild_id: 10,
            target_id: 20,
            executor_id: 30,
            kind: InfractionKind::Mute,
            reason: Some("spamming".to_string()),
            request_author_id: None,
            flag: None,
            created_at: Utc::now(),
            expires_at,
            archived_at: None,
            archived_by: None,
            updated_at: None,
            updated_by: None,
        }
    }

    #[test]
    fn test_mute_active_window() {
        let now = Utc::now();

        let active = mute_row(Some(now + Duration::hours(1)));
        assert!(active.mute_active_at(now));

        let expired = mute_row(Some(now - Duration::seconds(1)));
        assert!(!expired.mute_active_at(now));

        let mut archived = mute_row(Some(now + Duration::hours(1)));
        archived.archived_at = Some(now);
        assert!(!archived.mute_active_at(now));

        let mut ban = mute_row(Some(now + Duration::hours(1)));
        ban.kind = InfractionKind::Ban;
        assert!(!ban.mute_active_at(now));
    }

    #[test]
    fn test_new_infraction_reason_cap() {
        let long = "x".repeat(REASON_MAX_LEN + 50);
        let new = NewInfraction::new(1, 2, 3, InfractionKind::Note).with_reason(long);
        assert_eq!(new.reason.unwrap().chars().count(), REASON_MAX_LEN);

        let short = NewInfraction::new(1, 2, 3, InfractionKind::Note).with_reason("ok");
        assert_eq!(short.reason.as_deref(), Some("ok"));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(InfractionKind::Mute.to_string(), "Mute");
        assert_eq!(InfractionKind::Unban.to_string(), "Unban");
        assert_eq!(InfractionFlag::Quick.to_string(), "Quick");
    }
}
