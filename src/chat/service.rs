//! Chat service: composes the pipeline components into one request flow

use super::types::*;
use crate::config::{ChatGateConfig, RateLimitKeyScope};
use crate::error::{Error, Result};
use crate::maintenance::{self, MaintenanceTargets};
use crate::memory::{ConversationTurn, JsonFileStore, MemoryManager, Speaker};
use crate::personality::{PersonalityConfig, PersonalityResolver};
use crate::providers::{GenerationBackend, HealthPolicy, ProviderRouter};
use crate::ratelimit::{limit_key, RateLimiter};
use crate::safety::SafetyFilter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Per-request settings taken from the active configuration
#[derive(Debug, Clone, Copy)]
struct RequestSettings {
    key_scope: RateLimitKeyScope,
    timeout: Duration,
}

impl RequestSettings {
    fn from_config(config: &ChatGateConfig) -> Self {
        Self {
            key_scope: config.rate_limiting.scope,
            timeout: config.providers.timeout(),
        }
    }
}

struct MaintenanceHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// The message-processing pipeline.
///
/// Holds only references to the components it composes; each component
/// guards its own state.
pub struct ChatService {
    rate_limiter: Arc<RateLimiter>,
    personalities: Arc<PersonalityResolver>,
    safety: Arc<SafetyFilter>,
    memory: Arc<MemoryManager>,
    router: Arc<ProviderRouter>,
    settings: RwLock<RequestSettings>,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

impl ChatService {
    /// Build the service from configuration and the available backends.
    ///
    /// Every id in `providers.priority` must have a backend; backends not
    /// listed there are ignored.
    pub async fn new(
        config: &ChatGateConfig,
        backends: Vec<Arc<dyn GenerationBackend>>,
    ) -> Result<Self> {
        config.validate()?;

        let mut ordered = Vec::with_capacity(config.providers.priority.len());
        for id in &config.providers.priority {
            let backend = backends
                .iter()
                .find(|b| b.id() == id)
                .ok_or_else(|| Error::Config(format!("provider '{}' has no backend", id)))?;
            ordered.push(backend.clone());
        }
        for backend in &backends {
            if !config.providers.priority.iter().any(|id| id == backend.id()) {
                tracing::warn!(provider = %backend.id(), "Backend not in providers.priority, ignoring");
            }
        }

        let router = ProviderRouter::new(ordered, HealthPolicy::from_config(&config.providers))?;
        let safety = SafetyFilter::new(&config.safety)?;

        let memory = if config.storage.persist {
            let store = JsonFileStore::new(&config.storage.base_dir);
            if let Err(e) = store.create_dirs().await {
                tracing::warn!(
                    dir = %config.storage.base_dir.display(),
                    error = %e,
                    "Storage directory unavailable; memory will not survive restart"
                );
            }
            MemoryManager::load(&config.memory, Arc::new(store)).await
        } else {
            MemoryManager::in_memory(&config.memory)
        };

        tracing::info!(
            providers = config.providers.priority.len(),
            persist = config.storage.persist,
            "Chat service ready"
        );

        Ok(Self {
            rate_limiter: Arc::new(RateLimiter::from_config(&config.rate_limiting)),
            personalities: Arc::new(PersonalityResolver::new(config)),
            safety: Arc::new(safety),
            memory: Arc::new(memory),
            router: Arc::new(router),
            settings: RwLock::new(RequestSettings::from_config(config)),
            maintenance: Mutex::new(None),
        })
    }

    /// Run one message through the pipeline.
    pub async fn process(&self, message: &InboundMessage) -> Result<ChatReply> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "chat_request",
            %request_id,
            caller_id = %message.caller_id,
            channel_id = %message.channel_id
        );
        self.process_inner(message, request_id)
            .instrument(span)
            .await
    }

    async fn process_inner(&self, message: &InboundMessage, request_id: Uuid) -> Result<ChatReply> {
        let settings = *self.settings.read().await;
        let channel_id = message.channel_id.as_str();
        let group_id = message.group_id.as_deref();

        let key = limit_key(settings.key_scope, &message.caller_id, channel_id);
        self.rate_limiter.admit(&key).await.into_result()?;

        let personality = self.personalities.resolve(channel_id).await;
        tracing::debug!(personality = %personality.key(), source = ?personality.source, "Personality resolved");

        self.safety.validate_input(&message.text).into_result()?;

        let context = self.memory.build_context(channel_id, group_id).await;
        tracing::debug!(context_turns = context.len(), "Context built");

        let preferred = self.router.preference(channel_id).await;
        let completion = self
            .router
            .route_preferring(
                preferred.as_deref(),
                &personality.config.system_prompt,
                &context,
                &message.text,
                settings.timeout,
            )
            .await?;

        let redacted = self.safety.validate_output(&completion.text);

        self.memory
            .record_turns(
                channel_id,
                group_id,
                vec![
                    ConversationTurn::at(Speaker::User, message.text.clone(), message.timestamp),
                    ConversationTurn::assistant(redacted.text.clone()),
                ],
            )
            .await;

        tracing::info!(
            personality = %personality.key(),
            provider = %completion.provider_id,
            elapsed_ms = completion.elapsed.as_millis() as u64,
            redactions = redacted.findings.len(),
            "Request completed"
        );

        Ok(ChatReply {
            request_id,
            text: redacted.text,
            personality_key: personality.key().to_string(),
            provider_id: completion.provider_id,
            redactions: redacted.findings,
        })
    }

    /// Bind a channel to a personality.
    pub async fn set_personality(
        &self,
        channel_id: &str,
        personality_key: &str,
    ) -> Result<Arc<PersonalityConfig>> {
        self.personalities
            .set_override(channel_id, personality_key)
            .await
    }

    /// Prefer a provider for one channel; the rest of the priority order
    /// stays as fallback.
    pub async fn set_preferred_provider(&self, channel_id: &str, provider_id: &str) -> Result<()> {
        self.router.set_preference(channel_id, provider_id).await
    }

    /// Forget a channel's conversation history.
    pub async fn clear_history(&self, channel_id: &str) -> bool {
        self.memory.clear_channel(channel_id).await
    }

    /// Apply a freshly loaded configuration.
    ///
    /// Nothing changes if the new configuration is invalid or names a
    /// provider without a backend. Runtime personality overrides are
    /// discarded; memory bounds apply on each scope's next mutation.
    pub async fn reload(&self, config: &ChatGateConfig) -> Result<()> {
        config.validate()?;
        if let Some(unknown) = config
            .providers
            .priority
            .iter()
            .find(|id| !self.router.contains(id.as_str()))
        {
            return Err(Error::Config(format!("provider '{}' has no backend", unknown)));
        }

        self.router.set_priority(&config.providers.priority).await?;
        self.router
            .set_policy(HealthPolicy::from_config(&config.providers))
            .await;
        self.personalities.reload(config).await;
        self.rate_limiter
            .update_limits(
                Duration::from_secs(config.rate_limiting.cooldown_secs),
                config.rate_limiting.global_requests_per_minute,
            )
            .await;
        self.memory.set_config(&config.memory).await;
        *self.settings.write().await = RequestSettings::from_config(config);

        tracing::info!("Configuration reloaded");
        Ok(())
    }

    /// Personalities in load order, marking the one active for `channel_id`.
    pub async fn personality_summaries(&self, channel_id: Option<&str>) -> Vec<PersonalitySummary> {
        let active = match channel_id {
            Some(channel_id) => Some(self.personalities.resolve(channel_id).await),
            None => None,
        };
        self.personalities
            .list_all()
            .await
            .into_iter()
            .map(|p| PersonalitySummary {
                active: active.as_ref().map_or(false, |a| a.key() == p.key),
                key: p.key.clone(),
                display_name: p.display_name.clone(),
                tone: p.tone.clone(),
                allowed_features: p.allowed_features.iter().cloned().collect(),
            })
            .collect()
    }

    /// Providers in priority order with health, marking the channel's
    /// preferred provider.
    pub async fn provider_summaries(&self, channel_id: Option<&str>) -> Vec<ProviderSummary> {
        let preferred = match channel_id {
            Some(channel_id) => self.router.preference(channel_id).await,
            None => None,
        };
        self.router
            .health()
            .await
            .into_iter()
            .enumerate()
            .map(|(position, health)| ProviderSummary {
                position,
                preferred: preferred.as_deref() == Some(health.provider_id.as_str()),
                health,
            })
            .collect()
    }

    pub async fn stats_summary(&self) -> StatsSummary {
        StatsSummary {
            rate_limits: self.rate_limiter.global_stats().await,
            memory: self.memory.stats().await,
            providers: self.router.health().await,
        }
    }

    /// Start the periodic sweep. Calling it again while running is a no-op.
    pub async fn start_maintenance(&self, interval: Duration, caller_retention: Duration) {
        let mut slot = self.maintenance.lock().await;
        if slot.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let targets = MaintenanceTargets {
            rate_limiter: self.rate_limiter.clone(),
            memory: self.memory.clone(),
            caller_retention,
        };
        let task = maintenance::spawn(targets, interval, cancel.clone());
        tracing::info!(interval_secs = interval.as_secs(), "Maintenance task started");
        *slot = Some(MaintenanceHandle { cancel, task });
    }

    /// Stop maintenance and wait for queued persistence to finish.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.maintenance.lock().await.take() {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                tracing::warn!(error = %e, "Maintenance task ended abnormally");
            }
        }
        self.memory.flush().await;
        tracing::info!("Chat service stopped");
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn personalities(&self) -> &Arc<PersonalityResolver> {
        &self.personalities
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }
}
