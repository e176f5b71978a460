//! Request pipeline
//!
//! A request is a free-text message proposing a mute or ban, awaiting human
//! approval. The pipeline parses the message against a fixed grammar,
//! enforces one pending request per (target, kind) pair, tracks the link
//! between a ban request and its holding mute, and clears the tracking
//! entry on approval, denial, or deletion.

use crate::REQUEST_TARGET;
use crate::engine::{MAX_MUTE_DAYS, ModerationEngine, validate_moderation_action};
use crate::error::{ModerationError, ModerationResult, RequestLocation};
use crate::infraction::{InfractionKind, NewInfraction};
use crate::persist::{InfractionRepo, PersistError};
use crate::platform::{MemberProfile, PlatformActions};
use crate::registry::GuildState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Estimated per-attachment length once the platform expands it to a URL
pub const ATTACHMENT_URL_OVERHEAD: usize = 90;

/// Combined reason length limit, matching the infraction reason cap
pub const REQUEST_REASON_MAX_LEN: usize = 1024;

/// Reaction the bot leaves on a request that failed validation
pub const WARNING_EMOJI: &str = "\u{26a0}\u{fe0f}";

/// Seconds before a transient error reply deletes itself
const TRANSIENT_REPLY_SECS: u64 = 4;

/// What a request message proposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Mute,
    Ban,
}

/// A pending request, keyed by its message id in the guild state
#[derive(Debug, Clone)]
pub struct CachedRequest {
    pub message_id: u64,
    pub channel_id: u64,
    pub target_id: u64,
    pub kind: RequestKind,
    /// Holding mute applied while a ban request is pending, so a later
    /// edit to the request can amend the mute's reason
    pub mute_infraction_id: Option<u64>,
}

/// The inbound request message, as the event glue hands it over
#[derive(Debug, Clone)]
pub struct RequestMessage {
    pub guild_id: u64,
    pub message_id: u64,
    pub channel_id: u64,
    pub author_id: u64,
    pub content: String,
    pub attachment_count: usize,
    /// True once anyone has reacted to the message
    pub has_reactions: bool,
}

/// Output of the grammar pass, before the target is resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub target_id: u64,
    /// Duration token as written, mute requests only
    pub duration: Option<String>,
    pub reason: String,
}

/// A fully validated request, ready to track
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub target: MemberProfile,
    pub reason: String,
    pub duration: Option<String>,
}

/// Parse a target token: `<@id>`, `<@!id>`, or a raw id
fn parse_target_token(token: &str) -> Option<u64> {
    let inner = token
        .strip_prefix("<@!")
        .or_else(|| token.strip_prefix("<@"))
        .map_or(token, |rest| rest.strip_suffix('>').unwrap_or(rest));
    inner.parse().ok()
}

/// A duration token is digits followed by a single d/h/m unit
fn is_duration_token(token: &str) -> bool {
    token.len() >= 2
        && token.ends_with(['d', 'h', 'm'])
        && token[..token.len() - 1].chars().all(|c| c.is_ascii_digit())
}

/// Parse a request body against the fixed grammar: target mention or raw
/// id, optional duration token (mute requests only), then the reason.
pub fn parse_request(content: &str, kind: RequestKind) -> Result<ParsedRequest, String> {
    let reminder = match kind {
        RequestKind::Mute => {
            "requests are written as `@user [duration] reason`, e.g. `<@1234> 2h spamming`"
        }
        RequestKind::Ban => "requests are written as `@user reason`, e.g. `<@1234> raid account`",
    };

    let mut tokens = content.split_whitespace().peekable();
    let target_id = tokens
        .next()
        .and_then(parse_target_token)
        .ok_or_else(|| reminder.to_string())?;

    let duration = if kind == RequestKind::Mute
        && tokens.peek().is_some_and(|token| is_duration_token(token))
    {
        tokens.next().map(str::to_string)
    } else {
        None
    };

    let reason = tokens.collect::<Vec<_>>().join(" ");
    if reason.is_empty() {
        return Err(reminder.to_string());
    }

    Ok(ParsedRequest {
        target_id,
        duration,
        reason,
    })
}

/// Channel ids of every platform message link found in the text
#[must_use]
pub fn proof_link_channels(text: &str) -> Vec<u64> {
    text.split_whitespace()
        .filter(|token| token.starts_with("http"))
        .filter_map(|token| {
            let path = token.split_once("/channels/")?.1;
            let mut segments = path.split('/');
            let _guild = segments.next()?;
            segments.next()?.parse().ok()
        })
        .collect()
}

/// Validates requests and drives their lifecycle
#[derive(Clone)]
pub struct RequestPipeline {
    platform: Arc<dyn PlatformActions>,
    infractions: Arc<dyn InfractionRepo>,
}

impl RequestPipeline {
    #[must_use]
    pub fn new(platform: Arc<dyn PlatformActions>, infractions: Arc<dyn InfractionRepo>) -> Self {
        Self {
            platform,
            infractions,
        }
    }

    /// An already-pending request for the same (target, kind) pair under a
    /// different message id, if one exists.
    fn find_pending(
        state: &GuildState,
        target_id: u64,
        kind: RequestKind,
        message_id: u64,
    ) -> Option<RequestLocation> {
        state
            .requests
            .iter()
            .find(|entry| {
                let pending = entry.value();
                pending.target_id == target_id
                    && pending.kind == kind
                    && pending.message_id != message_id
            })
            .map(|entry| RequestLocation {
                guild_id: state.guild_id,
                channel_id: entry.value().channel_id,
                message_id: entry.value().message_id,
            })
    }

    /// Validate a request message and, on success, register it as pending.
    ///
    /// Validation is suspended at every platform call, so the duplicate
    /// check is re-verified immediately before registration. Two truly
    /// simultaneous submissions can still both register; that race is
    /// accepted rather than locked away.
    pub async fn validate_request(
        &self,
        state: &GuildState,
        message: &RequestMessage,
        kind: RequestKind,
    ) -> ModerationResult<ValidatedRequest> {
        let config = state.config();

        if message.attachment_count > 0 && config.media_log_channel_id.is_none() {
            return Err(ModerationError::validation(
                "requests with attachments need a media log channel; ask an admin to set one up",
            ));
        }

        let parsed = parse_request(&message.content, kind).map_err(ModerationError::validation)?;

        if let Some(allowed) = &config.proof_channel_ids {
            for channel_id in proof_link_channels(&parsed.reason) {
                if !allowed.contains(&channel_id) {
                    return Err(ModerationError::validation(format!(
                        "proof links must point at an allowed channel, not <#{channel_id}>"
                    )));
                }
            }
        }

        if let Some(existing) = Self::find_pending(state, parsed.target_id, kind, message.message_id)
        {
            return Err(ModerationError::DuplicateRequest { existing });
        }

        let expanded_len =
            parsed.reason.chars().count() + message.attachment_count * ATTACHMENT_URL_OVERHEAD;
        if expanded_len > REQUEST_REASON_MAX_LEN {
            return Err(ModerationError::validation(format!(
                "the reason is too long once attachment links are counted \
                 (limit {REQUEST_REASON_MAX_LEN} characters)"
            )));
        }

        let target = match self
            .platform
            .fetch_member(state.guild_id, parsed.target_id)
            .await?
        {
            Some(member) => member,
            None => self
                .platform
                .fetch_user(parsed.target_id)
                .await?
                .ok_or_else(|| ModerationError::validation("could not find that user"))?,
        };

        if let Some(rejection) =
            validate_moderation_action(message.author_id, &target, &config.staff_role_ids, &[])
        {
            return Err(ModerationError::validation(rejection));
        }

        match kind {
            RequestKind::Mute => {
                if !target.is_member {
                    return Err(ModerationError::validation(
                        "the target is no longer a member of this guild",
                    ));
                }
                if let Some(existing) = self
                    .infractions
                    .active_mute(state.guild_id, target.user_id)
                    .await?
                {
                    let until = existing
                        .expires_at
                        .map_or_else(String::new, |expires| expires.to_rfc3339());
                    return Err(ModerationError::validation(format!(
                        "user is already muted until {until}"
                    )));
                }
            }
            RequestKind::Ban => {
                if self
                    .platform
                    .fetch_ban(state.guild_id, target.user_id)
                    .await?
                {
                    return Err(ModerationError::validation("user is already banned"));
                }
            }
        }

        // Clear a stale warning from an earlier failed validation pass
        let _ = self
            .platform
            .remove_own_reaction(message.channel_id, message.message_id, WARNING_EMOJI)
            .await;

        // Re-check: another submission may have registered while this one
        // was suspended on the platform calls above.
        if let Some(existing) = Self::find_pending(state, parsed.target_id, kind, message.message_id)
        {
            return Err(ModerationError::DuplicateRequest { existing });
        }
        state
            .requests
            .entry(message.message_id)
            .or_insert(CachedRequest {
                message_id: message.message_id,
                channel_id: message.channel_id,
                target_id: parsed.target_id,
                kind,
                mute_infraction_id: None,
            });

        info!(
            target: REQUEST_TARGET,
            guild_id = %state.guild_id,
            message_id = %message.message_id,
            user_id = %parsed.target_id,
            kind = ?kind,
            "Request registered as pending"
        );

        Ok(ValidatedRequest {
            target,
            reason: parsed.reason,
            duration: parsed.duration,
        })
    }

    /// Apply the maximum-length holding mute while a ban request is
    /// pending and link the resulting infraction into the tracked request.
    ///
    /// An already-muted target is a benign no-op. Any other mute failure is
    /// reported with a transient reply that deletes itself; the ban request
    /// itself stays pending either way.
    pub async fn handle_ban_request_auto_mute(
        &self,
        state: &GuildState,
        engine: &ModerationEngine,
        message: &RequestMessage,
        target: &MemberProfile,
        reason: &str,
    ) -> ModerationResult<Option<u64>> {
        if self
            .infractions
            .active_mute(state.guild_id, target.user_id)
            .await?
            .is_some()
        {
            return Ok(None);
        }

        let config = state.config();
        let holding_duration = format!("{MAX_MUTE_DAYS}d");
        match engine
            .mute_member(
                state.guild_id,
                &config,
                target,
                message.author_id,
                &holding_duration,
                Some(reason),
                false,
                Some(message.author_id),
            )
            .await
        {
            Ok(outcome) => {
                if let Some(mut pending) = state.requests.get_mut(&message.message_id) {
                    pending.mute_infraction_id = Some(outcome.infraction_id);
                }
                Ok(Some(outcome.infraction_id))
            }
            Err(error) => {
                warn!(
                    target: REQUEST_TARGET,
                    guild_id = %state.guild_id,
                    user_id = %target.user_id,
                    error = %error,
                    "Holding mute for ban request failed"
                );
                self.send_transient_reply(
                    message.channel_id,
                    &format!("could not apply the holding mute: {error}"),
                )
                .await;
                Ok(None)
            }
        }
    }

    /// Approve a request: execute the action, persist the infraction with
    /// the original requester attached, confirm, and stop tracking it.
    /// Removing an already-removed entry is a no-op.
    pub async fn handle_request_approval(
        &self,
        state: &GuildState,
        engine: &ModerationEngine,
        message: &RequestMessage,
        kind: RequestKind,
        approver_id: u64,
    ) -> ModerationResult<()> {
        let config = state.config();
        let parsed = parse_request(&message.content, kind).map_err(ModerationError::validation)?;

        let target = match self
            .platform
            .fetch_member(state.guild_id, parsed.target_id)
            .await?
        {
            Some(member) => member,
            None => self
                .platform
                .fetch_user(parsed.target_id)
                .await?
                .ok_or_else(|| ModerationError::validation("could not find that user"))?,
        };

        match kind {
            RequestKind::Ban => {
                self.platform
                    .ban_member(state.guild_id, target.user_id, &parsed.reason)
                    .await?;
                engine
                    .resolve_infraction(
                        NewInfraction::new(
                            state.guild_id,
                            target.user_id,
                            approver_id,
                            InfractionKind::Ban,
                        )
                        .with_reason(&*parsed.reason)
                        .with_request_author(message.author_id),
                        None,
                        config.mod_log_channel_id,
                    )
                    .await?;
            }
            RequestKind::Mute => {
                let duration = parsed
                    .duration
                    .unwrap_or_else(|| config.default_mute_duration.clone());
                engine
                    .mute_member(
                        state.guild_id,
                        &config,
                        &target,
                        approver_id,
                        &duration,
                        Some(&parsed.reason),
                        false,
                        Some(message.author_id),
                    )
                    .await?;
            }
        }

        if let Err(error) = self
            .platform
            .send_message(
                message.channel_id,
                &format!("request for <@{}> approved", target.user_id),
            )
            .await
        {
            warn!(
                target: REQUEST_TARGET,
                guild_id = %state.guild_id,
                error = %error,
                "Failed to confirm request approval"
            );
        }

        state.requests.remove(&message.message_id);
        info!(
            target: REQUEST_TARGET,
            guild_id = %state.guild_id,
            message_id = %message.message_id,
            user_id = %target.user_id,
            approver_id = %approver_id,
            "Request approved"
        );
        Ok(())
    }

    /// Deny a request: notify and stop tracking it. Never touches the
    /// infraction store.
    pub async fn handle_request_denial(
        &self,
        state: &GuildState,
        message: &RequestMessage,
        denier_id: u64,
    ) -> ModerationResult<()> {
        if let Err(error) = self
            .platform
            .send_message(
                message.channel_id,
                &format!("request denied by <@{denier_id}>"),
            )
            .await
        {
            warn!(
                target: REQUEST_TARGET,
                guild_id = %state.guild_id,
                error = %error,
                "Failed to send denial notice"
            );
        }

        state.requests.remove(&message.message_id);
        Ok(())
    }

    /// Stop tracking a request whose message was deleted
    pub fn handle_request_deleted(state: &GuildState, message_id: u64) {
        state.requests.remove(&message_id);
    }

    /// Re-validate an edited request message.
    ///
    /// Skipped entirely once anyone has reacted: an edit after a human has
    /// engaged must not re-trigger validation or auto-mute. When the
    /// request carries a linked holding mute, the edited reason is copied
    /// onto that mute instead of creating anything new.
    pub async fn handle_request_edited(
        &self,
        state: &GuildState,
        message: &RequestMessage,
        kind: RequestKind,
        editor_id: u64,
    ) -> ModerationResult<Option<ValidatedRequest>> {
        if message.has_reactions {
            return Ok(None);
        }

        let linked_mute = state
            .requests
            .get(&message.message_id)
            .and_then(|pending| pending.mute_infraction_id);

        let validated = self.validate_request(state, message, kind).await?;

        if let Some(infraction_id) = linked_mute {
            match self
                .infractions
                .set_reason(state.guild_id, infraction_id, &validated.reason, editor_id)
                .await
            {
                Ok(_) => {}
                Err(PersistError::Conflict(detail)) => {
                    warn!(
                        target: REQUEST_TARGET,
                        guild_id = %state.guild_id,
                        infraction_id = %infraction_id,
                        detail = %detail,
                        "Skipped reason amendment on linked mute"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }

        Ok(Some(validated))
    }

    /// Fire-and-forget error reply that deletes itself shortly after
    async fn send_transient_reply(&self, channel_id: u64, content: &str) {
        let Ok(reply_id) = self.platform.send_message(channel_id, content).await else {
            return;
        };
        let platform = self.platform.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(TRANSIENT_REPLY_SECS)).await;
            let _ = platform.delete_message(channel_id, reply_id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryBackend;
    use crate::platform::MockPlatformActions;

    fn request_message(message_id: u64, content: &str) -> RequestMessage {
        RequestMessage {
            guild_id: 1,
            message_id,
            channel_id: 77,
            author_id: 9,
            content: content.to_string(),
            attachment_count: 0,
            has_reactions: false,
        }
    }

    fn pipeline_with(
        platform: MockPlatformActions,
    ) -> (RequestPipeline, ModerationEngine, Arc<MemoryBackend>) {
        let platform: Arc<dyn PlatformActions> = Arc::new(platform);
        let backend = Arc::new(MemoryBackend::new());
        (
            RequestPipeline::new(platform.clone(), backend.clone()),
            ModerationEngine::new(platform, backend.clone()),
            backend,
        )
    }

    fn state() -> GuildState {
        GuildState::new(1, Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_parse_request_grammar() {
        let parsed = parse_request("<@555> 2h spamming", RequestKind::Mute).unwrap();
        assert_eq!(parsed.target_id, 555);
        assert_eq!(parsed.duration.as_deref(), Some("2h"));
        assert_eq!(parsed.reason, "spamming");

        // No duration token: the whole remainder is the reason
        let parsed = parse_request("<@!555> being rude", RequestKind::Mute).unwrap();
        assert_eq!(parsed.target_id, 555);
        assert!(parsed.duration.is_none());
        assert_eq!(parsed.reason, "being rude");

        // Raw id target
        let parsed = parse_request("555 raid account", RequestKind::Ban).unwrap();
        assert_eq!(parsed.target_id, 555);
        assert_eq!(parsed.reason, "raid account");

        // Ban requests never consume a duration token
        let parsed = parse_request("<@555> 2h of spam", RequestKind::Ban).unwrap();
        assert!(parsed.duration.is_none());
        assert_eq!(parsed.reason, "2h of spam");

        // Missing reason and missing target both get the format reminder
        let err = parse_request("<@555> 2h", RequestKind::Mute).unwrap_err();
        assert!(err.contains("e.g."));
        let err = parse_request("no mention here", RequestKind::Mute).unwrap_err();
        assert!(err.contains("e.g."));
    }

    #[test]
    fn test_proof_link_channels() {
        let text = "spamming, proof: https://chat.example/channels/1/222/333 \
                    and https://chat.example/channels/1/444/555";
        assert_eq!(proof_link_channels(text), vec![222, 444]);
        assert!(proof_link_channels("no links here").is_empty());
        assert!(proof_link_channels("https://chat.example/other/1/2").is_empty());
    }

    #[tokio::test]
    async fn test_validate_rejects_attachments_without_media_log() {
        let (pipeline, _, _) = pipeline_with(MockPlatformActions::new());
        let state = state();
        let mut message = request_message(100, "<@555> 2h spamming");
        message.attachment_count = 1;

        let err = pipeline
            .validate_request(&state, &message, RequestKind::Mute)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("media log channel"));
    }

    #[tokio::test]
    async fn test_validate_rejects_disallowed_proof_link() {
        let (pipeline, _, _) = pipeline_with(MockPlatformActions::new());
        let state = state();
        let mut config = state.config();
        config.proof_channel_ids = Some(vec![222]);
        state.set_config(config);

        let message = request_message(
            100,
            "<@555> spamming https://chat.example/channels/1/999/3",
        );
        let err = pipeline
            .validate_request(&state, &message, RequestKind::Ban)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("allowed channel"));
    }

    #[tokio::test]
    async fn test_request_lifecycle_duplicate_then_approval() {
        let mut platform = MockPlatformActions::new();
        platform
            .expect_fetch_member()
            .returning(|_, user_id| Ok(Some(MemberProfile::member(user_id))));
        platform.expect_remove_own_reaction().returning(|_, _, _| Ok(()));
        platform.expect_timeout_member().returning(|_, _, _| Ok(()));
        platform.expect_send_message().returning(|_, _| Ok(900));
        let (pipeline, engine, backend) = pipeline_with(platform);
        let state = state();

        let first = request_message(100, "<@555> 2h spamming");
        let validated = pipeline
            .validate_request(&state, &first, RequestKind::Mute)
            .await
            .unwrap();
        assert_eq!(validated.target.user_id, 555);
        assert_eq!(validated.reason, "spamming");

        // Second request for the same pair, different message id
        let second = request_message(101, "<@555> 1h more spam");
        let err = pipeline
            .validate_request(&state, &second, RequestKind::Mute)
            .await
            .unwrap_err();
        match err {
            ModerationError::DuplicateRequest { existing } => {
                assert_eq!(existing.message_id, 100);
                assert_eq!(existing.channel_id, 77);
            }
            other => panic!("expected DuplicateRequest, got {other:?}"),
        }

        // Re-validating the same message id is not a duplicate
        pipeline
            .validate_request(&state, &first, RequestKind::Mute)
            .await
            .unwrap();

        pipeline
            .handle_request_approval(&state, &engine, &first, RequestKind::Mute, 42)
            .await
            .unwrap();
        assert!(state.requests.is_empty());

        let row = backend.get(1, 1).await.unwrap().unwrap();
        assert_eq!(row.kind, InfractionKind::Mute);
        assert_eq!(row.executor_id, 42);
        assert_eq!(row.request_author_id, Some(9));
        assert_eq!(row.reason.as_deref(), Some("spamming"));

        // The pair is free again once the first request resolved, but the
        // target is now muted, so a mute request is rejected on that ground
        let third = request_message(102, "<@555> 1h immediately back at it");
        let err = pipeline
            .validate_request(&state, &third, RequestKind::Mute)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("user is already muted"));
    }

    #[tokio::test]
    async fn test_validate_mute_rejects_non_member() {
        let mut platform = MockPlatformActions::new();
        platform.expect_fetch_member().returning(|_, _| Ok(None));
        platform
            .expect_fetch_user()
            .returning(|user_id| Ok(Some(MemberProfile::user(user_id))));
        let (pipeline, _, _) = pipeline_with(platform);
        let state = state();

        let message = request_message(100, "<@555> 2h spamming");
        let err = pipeline
            .validate_request(&state, &message, RequestKind::Mute)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no longer a member"));
    }

    #[tokio::test]
    async fn test_validate_ban_rejects_already_banned() {
        let mut platform = MockPlatformActions::new();
        platform.expect_fetch_member().returning(|_, _| Ok(None));
        platform
            .expect_fetch_user()
            .returning(|user_id| Ok(Some(MemberProfile::user(user_id))));
        platform.expect_fetch_ban().returning(|_, _| Ok(true));
        let (pipeline, _, _) = pipeline_with(platform);
        let state = state();

        let message = request_message(100, "<@555> raid account");
        let err = pipeline
            .validate_request(&state, &message, RequestKind::Ban)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "user is already banned");
    }

    #[tokio::test]
    async fn test_auto_mute_links_infraction_into_request() {
        let mut platform = MockPlatformActions::new();
        platform
            .expect_fetch_member()
            .returning(|_, user_id| Ok(Some(MemberProfile::member(user_id))));
        platform.expect_fetch_ban().returning(|_, _| Ok(false));
        platform.expect_remove_own_reaction().returning(|_, _, _| Ok(()));
        platform.expect_timeout_member().returning(|_, _, _| Ok(()));
        let (pipeline, engine, backend) = pipeline_with(platform);
        let state = state();

        let message = request_message(100, "<@555> raid account");
        let validated = pipeline
            .validate_request(&state, &message, RequestKind::Ban)
            .await
            .unwrap();

        let linked = pipeline
            .handle_ban_request_auto_mute(&state, &engine, &message, &validated.target, "raid account")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            state.requests.get(&100).unwrap().mute_infraction_id,
            Some(linked)
        );
        let row = backend.get(1, linked).await.unwrap().unwrap();
        assert_eq!(row.kind, InfractionKind::Mute);

        // Already muted now: a repeat call is a benign no-op
        let repeat = pipeline
            .handle_ban_request_auto_mute(&state, &engine, &message, &validated.target, "raid account")
            .await
            .unwrap();
        assert!(repeat.is_none());
    }

    #[tokio::test]
    async fn test_denial_removes_entry_without_persisting() {
        let mut platform = MockPlatformActions::new();
        platform
            .expect_fetch_member()
            .returning(|_, user_id| Ok(Some(MemberProfile::member(user_id))));
        platform.expect_fetch_ban().returning(|_, _| Ok(false));
        platform.expect_remove_own_reaction().returning(|_, _, _| Ok(()));
        platform.expect_send_message().returning(|_, _| Ok(900));
        let (pipeline, _, backend) = pipeline_with(platform);
        let state = state();

        let message = request_message(100, "<@555> raid account");
        pipeline
            .validate_request(&state, &message, RequestKind::Ban)
            .await
            .unwrap();

        pipeline
            .handle_request_denial(&state, &message, 42)
            .await
            .unwrap();
        assert!(state.requests.is_empty());
        assert!(backend.get(1, 1).await.unwrap().is_none());

        // Denying again is a no-op
        pipeline
            .handle_request_denial(&state, &message, 42)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_edit_skipped_once_reactions_exist() {
        let (pipeline, _, _) = pipeline_with(MockPlatformActions::new());
        let state = state();

        let mut message = request_message(100, "<@555> 2h edited reason");
        message.has_reactions = true;
        let result = pipeline
            .handle_request_edited(&state, &message, RequestKind::Mute, 9)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_edit_amends_linked_mute_reason() {
        let mut platform = MockPlatformActions::new();
        platform
            .expect_fetch_member()
            .returning(|_, user_id| Ok(Some(MemberProfile::member(user_id))));
        platform.expect_fetch_ban().returning(|_, _| Ok(false));
        platform.expect_remove_own_reaction().returning(|_, _, _| Ok(()));
        platform.expect_timeout_member().returning(|_, _, _| Ok(()));
        let (pipeline, engine, backend) = pipeline_with(platform);
        let state = state();

        let message = request_message(100, "<@555> raid account");
        let validated = pipeline
            .validate_request(&state, &message, RequestKind::Ban)
            .await
            .unwrap();
        let linked = pipeline
            .handle_ban_request_auto_mute(&state, &engine, &message, &validated.target, "raid account")
            .await
            .unwrap()
            .unwrap();

        let mut edited = message.clone();
        edited.content = "<@555> raid account with proof this time".to_string();
        pipeline
            .handle_request_edited(&state, &edited, RequestKind::Ban, 9)
            .await
            .unwrap();

        let row = backend.get(1, linked).await.unwrap().unwrap();
        assert_eq!(
            row.reason.as_deref(),
            Some("raid account with proof this time")
        );
        assert_eq!(row.updated_by, Some(9));
    }
}
