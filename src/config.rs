//! Guild configuration structures

use serde::{Deserialize, Serialize};

/// Per-guild configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildConfig {
    pub guild_id: u64,
    /// Roles whose holders may never be targeted by moderation actions
    pub staff_role_ids: Vec<u64>,
    /// Channel for infraction log lines
    pub mod_log_channel_id: Option<u64>,
    /// Channel request attachments are re-uploaded to; requests with
    /// attachments are rejected while this is unset
    pub media_log_channel_id: Option<u64>,
    /// Channels proof message-links may point at; `None` disables the check
    pub proof_channel_ids: Option<Vec<u64>>,
    pub mute_request_channel_id: Option<u64>,
    pub ban_request_channel_id: Option<u64>,
    /// Applied when a mute request carries no duration token
    pub default_mute_duration: String,
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            guild_id: 0,
            staff_role_ids: Vec::new(),
            mod_log_channel_id: None,
            media_log_channel_id: None,
            proof_channel_ids: None,
            mute_request_channel_id: None,
            ban_request_channel_id: None,
            default_mute_duration: "1h".to_string(),
        }
    }
}

impl GuildConfig {
    #[must_use]
    pub fn for_guild(guild_id: u64) -> Self {
        Self {
            guild_id,
            ..Default::default()
        }
    }
}
