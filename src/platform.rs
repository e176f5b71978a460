//! Platform-action interface
//!
//! Everything the core needs from the chat platform lives behind the
//! [`PlatformActions`] trait. All calls are asynchronous and may fail for
//! routine reasons (member left, already banned, missing permission), so
//! every call site treats failure as an expected outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors returned by platform calls
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The member, user, channel, or message no longer exists
    #[error("not found: {0}")]
    NotFound(String),

    /// The bot lacks permission for the attempted call
    #[error("missing permission: {0}")]
    MissingPermission(String),

    /// Any other platform failure (rate limit, transport, ...)
    #[error("platform error: {0}")]
    Other(String),
}

/// Snapshot of a user as the platform sees them, including the platform's
/// own permission verdicts for the actions the engine may attempt.
#[derive(Debug, Clone, Default)]
pub struct MemberProfile {
    pub user_id: u64,
    pub display_name: String,
    /// Automated account
    pub is_bot: bool,
    pub role_ids: Vec<u64>,
    /// False when only a bare user lookup resolved (left the guild)
    pub is_member: bool,
    /// The platform allows timing this user out
    pub moderatable: bool,
    /// The platform allows kicking this user
    pub kickable: bool,
    /// The platform allows banning this user
    pub bannable: bool,
}

impl MemberProfile {
    /// A current guild member the platform would let us act on
    #[must_use]
    pub fn member(user_id: u64) -> Self {
        Self {
            user_id,
            is_member: true,
            moderatable: true,
            kickable: true,
            bannable: true,
            ..Default::default()
        }
    }

    /// A bare user (not currently a member); bans still apply to these
    #[must_use]
    pub fn user(user_id: u64) -> Self {
        Self {
            user_id,
            bannable: true,
            ..Default::default()
        }
    }

    /// Mark this profile as a bot account
    #[must_use]
    pub fn bot(mut self) -> Self {
        self.is_bot = true;
        self
    }

    /// Attach role ids to this profile
    #[must_use]
    pub fn with_roles(mut self, role_ids: Vec<u64>) -> Self {
        self.role_ids = role_ids;
        self
    }
}

/// The platform surface consumed by the core.
///
/// The command/button/listener glue implements this against the real chat
/// SDK; tests implement it with a mock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformActions: Send + Sync {
    /// Fetch a current guild member, `None` if they are not in the guild
    async fn fetch_member(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<Option<MemberProfile>, PlatformError>;

    /// Fetch a bare user, `None` if the account no longer exists
    async fn fetch_user(&self, user_id: u64) -> Result<Option<MemberProfile>, PlatformError>;

    /// Whether the user is currently banned from the guild
    async fn fetch_ban(&self, guild_id: u64, user_id: u64) -> Result<bool, PlatformError>;

    /// Apply a communication timeout until the given instant
    async fn timeout_member(
        &self,
        guild_id: u64,
        user_id: u64,
        until: DateTime<Utc>,
    ) -> Result<(), PlatformError>;

    /// Clear an active communication timeout
    async fn clear_timeout(&self, guild_id: u64, user_id: u64) -> Result<(), PlatformError>;

    async fn ban_member(
        &self,
        guild_id: u64,
        user_id: u64,
        reason: &str,
    ) -> Result<(), PlatformError>;

    async fn unban_member(&self, guild_id: u64, user_id: u64) -> Result<(), PlatformError>;

    async fn kick_member(
        &self,
        guild_id: u64,
        user_id: u64,
        reason: &str,
    ) -> Result<(), PlatformError>;

    /// Bulk-delete messages by id; returns how many the platform removed,
    /// which may be fewer than requested (some ids already gone)
    async fn bulk_delete_messages(
        &self,
        channel_id: u64,
        message_ids: &[u64],
    ) -> Result<usize, PlatformError>;

    /// Send a plain message; returns the created message id
    async fn send_message(&self, channel_id: u64, content: &str) -> Result<u64, PlatformError>;

    async fn delete_message(&self, channel_id: u64, message_id: u64)
    -> Result<(), PlatformError>;

    async fn add_reaction(
        &self,
        channel_id: u64,
        message_id: u64,
        emoji: &str,
    ) -> Result<(), PlatformError>;

    /// Remove a reaction previously added by the bot itself
    async fn remove_own_reaction(
        &self,
        channel_id: u64,
        message_id: u64,
        emoji: &str,
    ) -> Result<(), PlatformError>;

    /// Append text to the end of a message previously sent by the bot
    async fn append_to_message(
        &self,
        channel_id: u64,
        message_id: u64,
        suffix: &str,
    ) -> Result<(), PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_profile_constructors() {
        let member = MemberProfile::member(42);
        assert!(member.is_member);
        assert!(member.moderatable);
        assert!(member.bannable);
        assert!(!member.is_bot);

        let user = MemberProfile::user(42);
        assert!(!user.is_member);
        assert!(!user.moderatable);
        assert!(user.bannable);

        let bot = MemberProfile::member(7).bot();
        assert!(bot.is_bot);

        let staff = MemberProfile::member(9).with_roles(vec![100, 200]);
        assert_eq!(staff.role_ids, vec![100, 200]);
    }

    #[test]
    fn test_platform_error_display() {
        let error = PlatformError::NotFound("member 42".to_string());
        assert_eq!(error.to_string(), "not found: member 42");

        let error = PlatformError::MissingPermission("ban".to_string());
        assert_eq!(error.to_string(), "missing permission: ban");
    }
}
