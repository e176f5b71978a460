//! Process-wide guild registry
//!
//! One registry owns every per-guild working set (message cache, pending
//! requests, config) plus the shared engine, pipeline, and purge
//! coordinator. It is created at process start and passed by reference into
//! every handler; nothing in the core reaches for ambient statics, so tests
//! construct isolated registries per case.

use crate::CACHE_TARGET;
use crate::config::GuildConfig;
use crate::engine::ModerationEngine;
use crate::message_cache::MessageCache;
use crate::persist::{InfractionRepo, MessageRepo};
use crate::platform::PlatformActions;
use crate::purge::PurgeCoordinator;
use crate::request::{CachedRequest, RequestPipeline};
use dashmap::DashMap;
use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::Duration;
use tracing::{error, info};

/// Default interval between message-cache flushes
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 600;

/// Requests handled by the background flush task
#[derive(Debug, Clone)]
pub enum FlushRequest {
    /// Flush every guild's message cache now
    FlushAll,
    /// Flush one guild's message cache now
    FlushGuild { guild_id: u64 },
    /// Stop the flush task
    Shutdown,
}

/// Everything the core tracks for one guild
pub struct GuildState {
    pub guild_id: u64,
    config: RwLock<GuildConfig>,
    pub messages: MessageCache,
    /// Pending requests keyed by request message id
    pub requests: DashMap<u64, CachedRequest>,
}

impl GuildState {
    #[must_use]
    pub fn new(guild_id: u64, message_repo: Arc<dyn MessageRepo>) -> Self {
        Self {
            guild_id,
            config: RwLock::new(GuildConfig::for_guild(guild_id)),
            messages: MessageCache::new(guild_id, message_repo),
            requests: DashMap::new(),
        }
    }

    /// Snapshot of the guild's configuration
    #[must_use]
    pub fn config(&self) -> GuildConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_config(&self, config: GuildConfig) {
        *self
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config;
    }
}

/// Handle to the process-wide registry
#[derive(Clone)]
pub struct Registry(pub Arc<RegistryInner>);

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("guilds", &self.guilds.len())
            .finish_non_exhaustive()
    }
}

impl Deref for Registry {
    type Target = RegistryInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Shared state behind the registry handle
pub struct RegistryInner {
    /// Per-guild state, created lazily and kept for the process lifetime
    pub guilds: DashMap<u64, Arc<GuildState>>,
    pub engine: ModerationEngine,
    pub requests: RequestPipeline,
    pub purges: PurgeCoordinator,
    message_repo: Arc<dyn MessageRepo>,
}

impl Registry {
    #[must_use]
    pub fn new(
        platform: Arc<dyn PlatformActions>,
        infraction_repo: Arc<dyn InfractionRepo>,
        message_repo: Arc<dyn MessageRepo>,
    ) -> Self {
        Self(Arc::new(RegistryInner {
            guilds: DashMap::new(),
            engine: ModerationEngine::new(platform.clone(), infraction_repo.clone()),
            requests: RequestPipeline::new(platform.clone(), infraction_repo),
            purges: PurgeCoordinator::new(platform, message_repo.clone()),
            message_repo,
        }))
    }

    /// The state for a guild, created on first access
    #[must_use]
    pub fn guild(&self, guild_id: u64) -> Arc<GuildState> {
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| Arc::new(GuildState::new(guild_id, self.message_repo.clone())))
            .clone()
    }

    /// Load guild configurations from the YAML config file. A missing or
    /// unreadable file leaves every guild on defaults.
    pub async fn load_configs(&self) {
        const CONFIG_FILE: &str = "data/guild_configs.yaml";

        if let Ok(file_content) = tokio::fs::read_to_string(CONFIG_FILE).await {
            if let Ok(configs) = serde_yaml::from_str::<Vec<GuildConfig>>(&file_content) {
                for config in configs {
                    let state = self.guild(config.guild_id);
                    state.set_config(config);
                }
            }
        }
    }

    /// Save every guild's configuration to the YAML config file
    ///
    /// # Errors
    /// This function will return an error if:
    /// - The data directory cannot be created
    /// - The configurations cannot be serialized to YAML
    /// - The YAML data cannot be written to the config file
    pub async fn save_configs(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        const DATA_DIR: &str = "data";
        const CONFIG_FILE: &str = "data/guild_configs.yaml";

        if !std::path::Path::new(DATA_DIR).exists() {
            tokio::fs::create_dir_all(DATA_DIR).await?;
        }

        let configs: Vec<GuildConfig> = self
            .guilds
            .iter()
            .map(|entry| entry.value().config())
            .collect();
        let yaml = serde_yaml::to_string(&configs)?;
        tokio::fs::write(CONFIG_FILE, yaml).await?;

        Ok(())
    }

    /// Spawn the background flush task and return its request sender.
    /// The task flushes every guild's message cache on the interval and on
    /// demand, until a [`FlushRequest::Shutdown`] arrives.
    pub fn start_flush_task(&self, flush_interval_seconds: u64) -> Sender<FlushRequest> {
        let (tx, rx) = mpsc::channel::<FlushRequest>(100);
        let registry = self.clone();
        tokio::spawn(async move {
            registry.flush_task(rx, flush_interval_seconds).await;
        });
        tx
    }

    async fn flush_task(&self, mut rx: Receiver<FlushRequest>, flush_interval_seconds: u64) {
        info!(
            target: CACHE_TARGET,
            "Starting flush task with {flush_interval_seconds}s interval"
        );

        let mut interval = tokio::time::interval(Duration::from_secs(flush_interval_seconds));

        loop {
            tokio::select! {
                Some(request) = rx.recv() => {
                    match request {
                        FlushRequest::FlushAll => {
                            self.flush_all().await;
                        }
                        FlushRequest::FlushGuild { guild_id } => {
                            let state = self.guild(guild_id);
                            if let Err(e) = state.messages.flush().await {
                                error!(
                                    target: CACHE_TARGET,
                                    guild_id = %guild_id,
                                    "Error flushing message cache: {e}"
                                );
                            }
                        }
                        FlushRequest::Shutdown => {
                            info!(target: CACHE_TARGET, "Received shutdown request for flush task");
                            self.flush_all().await;
                            break;
                        }
                    }
                },

                _ = interval.tick() => {
                    self.flush_all().await;
                }
            }
        }

        info!(target: CACHE_TARGET, "Flush task shut down");
    }

    /// Flush every guild's message cache, continuing past per-guild errors
    pub async fn flush_all(&self) {
        // Collect the handles first; flushing awaits, and DashMap guards
        // must not be held across an await point.
        let states: Vec<Arc<GuildState>> = self
            .guilds
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for state in states {
            if let Err(e) = state.messages.flush().await {
                error!(
                    target: CACHE_TARGET,
                    guild_id = %state.guild_id,
                    "Error flushing message cache: {e}"
                );
            }
        }
    }
}
