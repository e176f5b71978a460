//! Moderation engine
//!
//! Validates whether an action may be applied to a target, executes the
//! platform action, and persists the result as an infraction. Owns the
//! mute-duration grammar and duplicate-mute detection.

use crate::ENGINE_TARGET;
use crate::config::GuildConfig;
use crate::error::{ModerationError, ModerationResult};
use crate::infraction::{Infraction, InfractionFlag, InfractionKind, NewInfraction};
use crate::logging::log_console;
use crate::persist::InfractionRepo;
use crate::platform::{MemberProfile, PlatformActions};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Hard cap on mute durations
pub const MAX_MUTE_DAYS: i64 = 28;

/// A caller-supplied validation step, evaluated after the built-in
/// self/bot/staff checks, in the order given.
#[derive(Debug, Clone, Copy)]
pub struct ExtraCheck<'a> {
    /// True when the check rejects the action
    pub failed: bool,
    /// Rejection message shown to the user
    pub rejection: &'a str,
}

/// Decide whether `executor` may act on `target`. Returns `None` when
/// permitted, or the rejection message.
///
/// The priority order is a fixed contract: self-check first, bot-check
/// second, staff-check third, extra checks last.
#[must_use]
pub fn validate_moderation_action(
    executor_id: u64,
    target: &MemberProfile,
    staff_role_ids: &[u64],
    extra_checks: &[ExtraCheck<'_>],
) -> Option<String> {
    if target.user_id == executor_id {
        return Some("you cannot target yourself".to_string());
    }
    if target.is_bot {
        return Some("bots cannot be targeted".to_string());
    }
    if target
        .role_ids
        .iter()
        .any(|role| staff_role_ids.contains(role))
    {
        return Some("staff members cannot be targeted".to_string());
    }
    for check in extra_checks {
        if check.failed {
            return Some(check.rejection.to_string());
        }
    }
    None
}

/// Parse a duration string against the restricted grammar: digits followed
/// by a single `d`, `h`, or `m` unit. No seconds, weeks, or free-form text.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    const REMINDER: &str = "durations are written as a number followed by d, h, or m, e.g. 2h";

    let input = input.trim();
    let digits_end = input
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| REMINDER.to_string())?;
    let (digits, unit) = input.split_at(digits_end);
    let unit = unit.trim_start();

    let value: i64 = digits.parse().map_err(|_| REMINDER.to_string())?;
    if value <= 0 {
        return Err("duration must be positive".to_string());
    }

    match unit {
        "d" => Ok(Duration::days(value)),
        "h" => Ok(Duration::hours(value)),
        "m" => Ok(Duration::minutes(value)),
        _ => Err(REMINDER.to_string()),
    }
}

/// Result of a successful mute
#[derive(Debug, Clone, Copy)]
pub struct MuteOutcome {
    pub infraction_id: u64,
    pub expires_at: DateTime<Utc>,
}

/// Validates, executes, and persists moderation actions
#[derive(Clone)]
pub struct ModerationEngine {
    platform: Arc<dyn PlatformActions>,
    infractions: Arc<dyn InfractionRepo>,
}

impl ModerationEngine {
    #[must_use]
    pub fn new(platform: Arc<dyn PlatformActions>, infractions: Arc<dyn InfractionRepo>) -> Self {
        Self {
            platform,
            infractions,
        }
    }

    /// The target's active mute, if any
    pub async fn active_mute(
        &self,
        guild_id: u64,
        target_id: u64,
    ) -> ModerationResult<Option<Infraction>> {
        Ok(self.infractions.active_mute(guild_id, target_id).await?)
    }

    /// Apply a timeout to `target` and persist the mute.
    ///
    /// Mutes are never stacked or silently extended: an active, non-expired
    /// mute rejects the call with the existing expiry. Durations above
    /// [`MAX_MUTE_DAYS`] are rejected outright, not clamped.
    ///
    /// # Errors
    /// Validation rejections and platform failures return before anything
    /// is persisted. A persistence failure after the platform timeout took
    /// effect surfaces to the caller without rolling the timeout back.
    #[allow(clippy::too_many_arguments)]
    pub async fn mute_member(
        &self,
        guild_id: u64,
        config: &GuildConfig,
        target: &MemberProfile,
        executor_id: u64,
        duration: &str,
        reason: Option<&str>,
        quick: bool,
        request_author_id: Option<u64>,
    ) -> ModerationResult<MuteOutcome> {
        let extra = [ExtraCheck {
            failed: !target.moderatable,
            rejection: "this member cannot be muted",
        }];
        if let Some(rejection) =
            validate_moderation_action(executor_id, target, &config.staff_role_ids, &extra)
        {
            return Err(ModerationError::validation(rejection));
        }

        if let Some(existing) = self.infractions.active_mute(guild_id, target.user_id).await? {
            let until = existing
                .expires_at
                .map_or_else(String::new, |expires| expires.to_rfc3339());
            return Err(ModerationError::validation(format!(
                "user is already muted until {until}"
            )));
        }

        let duration = parse_duration(duration).map_err(ModerationError::validation)?;
        if duration > Duration::days(MAX_MUTE_DAYS) {
            return Err(ModerationError::validation(format!(
                "mute duration cannot exceed {MAX_MUTE_DAYS} days"
            )));
        }

        let expires_at = Utc::now() + duration;
        self.platform
            .timeout_member(guild_id, target.user_id, expires_at)
            .await?;

        let mut new = NewInfraction::new(guild_id, target.user_id, executor_id, InfractionKind::Mute)
            .with_expiry(expires_at);
        if let Some(reason) = reason {
            new = new.with_reason(reason);
        }
        if quick {
            new = new.with_flag(InfractionFlag::Quick);
        }
        if let Some(author) = request_author_id {
            new = new.with_request_author(author);
        }

        // The timeout is already in force; a failure here is an accepted
        // inconsistency window, surfaced rather than rolled back.
        let infraction = self.persist(new).await?;

        info!(
            target: ENGINE_TARGET,
            guild_id = %guild_id,
            user_id = %target.user_id,
            executor_id = %executor_id,
            infraction_id = %infraction.id,
            expires_at = %expires_at,
            "Member muted"
        );

        Ok(MuteOutcome {
            infraction_id: infraction.id,
            expires_at,
        })
    }

    /// Persist an infraction and best-effort announce it in the mod log.
    ///
    /// For mutes the expiry is computed from `duration`; for every other
    /// kind it is left unset. Persistence failures propagate; a failed
    /// log send is logged and swallowed.
    pub async fn resolve_infraction(
        &self,
        mut new: NewInfraction,
        duration: Option<Duration>,
        log_channel_id: Option<u64>,
    ) -> ModerationResult<u64> {
        new.expires_at = if new.kind == InfractionKind::Mute {
            duration.map(|d| Utc::now() + d)
        } else {
            None
        };

        let infraction = self.persist(new).await?;

        if let Some(channel_id) = log_channel_id {
            let line = format_log_line(&infraction);
            if let Err(error) = self.platform.send_message(channel_id, &line).await {
                warn!(
                    target: ENGINE_TARGET,
                    guild_id = %infraction.guild_id,
                    infraction_id = %infraction.id,
                    error = %error,
                    "Failed to send infraction log line"
                );
            }
        }

        Ok(infraction.id)
    }

    /// Record an action taken outside the bot (observed via the platform
    /// audit log), flagged `Automatic`.
    pub async fn record_external_action(
        &self,
        guild_id: u64,
        target_id: u64,
        executor_id: u64,
        kind: InfractionKind,
        reason: Option<&str>,
    ) -> ModerationResult<u64> {
        let mut new = NewInfraction::new(guild_id, target_id, executor_id, kind)
            .with_flag(InfractionFlag::Automatic);
        if let Some(reason) = reason {
            new = new.with_reason(reason);
        }
        let infraction = self.persist(new).await?;

        info!(
            target: ENGINE_TARGET,
            guild_id = %guild_id,
            user_id = %target_id,
            infraction_id = %infraction.id,
            kind = %kind,
            "Recorded external moderation action"
        );
        Ok(infraction.id)
    }

    /// Insert an infraction, reporting a persistence failure to the
    /// operator console before surfacing it
    async fn persist(&self, new: NewInfraction) -> ModerationResult<Infraction> {
        let (guild_id, target_id, kind) = (new.guild_id, new.target_id, new.kind);
        match self.infractions.insert(new).await {
            Ok(infraction) => Ok(infraction),
            Err(error) => {
                log_console(format!(
                    "failed to persist {kind} infraction for user {target_id} \
                     in guild {guild_id}: {error}"
                ));
                Err(error.into())
            }
        }
    }
}

/// One-line mod-log rendering of an infraction
fn format_log_line(infraction: &Infraction) -> String {
    let mut line = format!(
        "case #{} {}: <@{}> by <@{}>",
        infraction.id, infraction.kind, infraction.target_id, infraction.executor_id
    );
    if let Some(expires) = infraction.expires_at {
        line.push_str(&format!(" until {}", expires.to_rfc3339()));
    }
    if let Some(reason) = &infraction.reason {
        line.push_str(&format!(" for {reason}"));
    }
    line
}
