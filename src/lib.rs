pub mod config;
pub mod engine;
pub mod error;
pub mod infraction;
pub mod logging;
pub mod matcher;
pub mod message_cache;
pub mod persist;
pub mod platform;
pub mod purge;
pub mod registry;
pub mod request;

// Customize these constants for your deployment
pub const BOT_NAME: &str = "warden";
pub const ENGINE_TARGET: &str = "warden::engine";
pub const REQUEST_TARGET: &str = "warden::request";
pub const CACHE_TARGET: &str = "warden::cache";
pub const PURGE_TARGET: &str = "warden::purge";
pub const ERROR_TARGET: &str = "warden::error";
pub const CONSOLE_TARGET: &str = "warden";

pub use config::GuildConfig;
pub use engine::{ModerationEngine, MuteOutcome, validate_moderation_action};
pub use error::{ModerationError, ModerationResult, RequestLocation};
pub use infraction::{Infraction, InfractionFlag, InfractionKind, NewInfraction};
pub use message_cache::{CachedMessage, DeletedMessage, MessageCache};
pub use persist::{InfractionRepo, MemoryBackend, MessageRepo, PersistError};
pub use platform::{MemberProfile, PlatformActions, PlatformError};
pub use purge::{PurgeCoordinator, PurgeRecord};
pub use registry::{FlushRequest, GuildState, Registry};
pub use request::{CachedRequest, RequestKind, RequestMessage, RequestPipeline, ValidatedRequest};
