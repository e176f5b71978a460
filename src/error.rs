//! Error types for the moderation core
//!
//! Callers branch on the error kind, never on message text: an expected
//! validation rejection, a duplicate request, a failed platform call, and a
//! failed durable-store call each get their own variant.

use crate::persist::PersistError;
use crate::platform::PlatformError;
use std::fmt;
use thiserror::Error;

/// Where an already-pending request message lives, so a duplicate rejection
/// can point a human at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLocation {
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
}

impl fmt::Display for RequestLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channels/{}/{}/{}",
            self.guild_id, self.channel_id, self.message_id
        )
    }
}

/// Errors that can occur during moderation operations
#[derive(Debug, Error)]
pub enum ModerationError {
    /// Expected rejection with a human-readable message; never persisted,
    /// never retried
    #[error("{0}")]
    Validation(String),

    /// A pending request already exists for the same (target, kind) pair
    #[error("a request for this user has already been submitted: see {existing}")]
    DuplicateRequest { existing: RequestLocation },

    /// A platform call failed (permission denied, target vanished, ...)
    #[error("platform call failed: {0}")]
    Platform(#[from] PlatformError),

    /// A durable-store call failed
    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistError),
}

impl ModerationError {
    /// Create a validation rejection
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True for the expected-rejection variants a caller shows to the user
    /// without logging as a fault
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::DuplicateRequest { .. })
    }
}

/// Result type for moderation operations
pub type ModerationResult<T> = Result<T, ModerationError>;
