//! Ordered dispatch across generation backends with health-aware fallback
//!
//! Each provider has its own health record behind its own lock, so
//! concurrent failures of one provider are counted exactly once each and
//! never contend with other providers. A per-attempt timeout cancels only
//! that provider's in-flight call; the route then moves on.

use super::backend::{BackendError, GenerationBackend};
use super::health::{HealthPolicy, HealthSnapshot, ProviderHealth};
use crate::error::{Error, Result};
use crate::memory::ConversationTurn;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

const COOLING_DOWN: &str = "cooling down";

/// One provider's outcome in a failed route
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderAttempt {
    pub provider_id: String,
    pub reason: String,
}

/// Successful generation
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub provider_id: String,
    pub elapsed: Duration,
}

struct ProviderSlot {
    backend: Arc<dyn GenerationBackend>,
    health: Mutex<ProviderHealth>,
}

/// Routes generation requests across providers in priority order.
pub struct ProviderRouter {
    slots: HashMap<String, ProviderSlot>,
    priority: RwLock<Vec<String>>,
    policy: RwLock<HealthPolicy>,
    /// Channel id → preferred provider id
    preferences: RwLock<HashMap<String, String>>,
}

impl ProviderRouter {
    /// Register backends; their order is the initial priority.
    pub fn new(backends: Vec<Arc<dyn GenerationBackend>>, policy: HealthPolicy) -> Result<Self> {
        if backends.is_empty() {
            return Err(Error::Config("no providers configured".to_string()));
        }

        let mut slots = HashMap::new();
        let mut priority = Vec::with_capacity(backends.len());
        for backend in backends {
            let id = backend.id().to_string();
            if slots.contains_key(&id) {
                return Err(Error::Config(format!("duplicate provider id '{}'", id)));
            }
            priority.push(id.clone());
            slots.insert(
                id.clone(),
                ProviderSlot {
                    backend,
                    health: Mutex::new(ProviderHealth::new(id)),
                },
            );
        }

        tracing::info!(providers = ?priority, "Provider router initialized");
        Ok(Self {
            slots,
            priority: RwLock::new(priority),
            policy: RwLock::new(policy),
            preferences: RwLock::new(HashMap::new()),
        })
    }

    /// Try providers in priority order until one succeeds.
    pub async fn route(
        &self,
        system_prompt: &str,
        context: &[ConversationTurn],
        prompt: &str,
        timeout: Duration,
    ) -> Result<Completion> {
        self.route_preferring(None, system_prompt, context, prompt, timeout)
            .await
    }

    /// Like [`route`](Self::route), but try `preferred` first when it is a
    /// registered provider.
    pub async fn route_preferring(
        &self,
        preferred: Option<&str>,
        system_prompt: &str,
        context: &[ConversationTurn],
        prompt: &str,
        timeout: Duration,
    ) -> Result<Completion> {
        let order = self.attempt_order(preferred).await;
        let policy = *self.policy.read().await;
        let mut attempts = Vec::new();

        for id in order {
            let Some(slot) = self.slots.get(&id) else {
                continue;
            };

            if !slot.health.lock().await.is_eligible(Instant::now()) {
                tracing::debug!(provider = %id, "Skipping provider in cooldown");
                attempts.push(ProviderAttempt {
                    provider_id: id,
                    reason: COOLING_DOWN.to_string(),
                });
                continue;
            }

            let started = Instant::now();
            let outcome = tokio::time::timeout(
                timeout,
                slot.backend.send(system_prompt, context, prompt, timeout),
            )
            .await
            .unwrap_or(Err(BackendError::Timeout(timeout)));
            let elapsed = started.elapsed();

            let mut health = slot.health.lock().await;
            match outcome {
                Ok(text) => {
                    health.record_success(elapsed);
                    if !attempts.is_empty() {
                        tracing::info!(
                            provider = %id,
                            skipped_or_failed = attempts.len(),
                            "Fell back to provider"
                        );
                    }
                    tracing::debug!(provider = %id, elapsed_ms = elapsed.as_millis() as u64, "Provider succeeded");
                    return Ok(Completion {
                        text,
                        provider_id: id,
                        elapsed,
                    });
                }
                Err(e) => {
                    let reason = e.to_string();
                    health.record_failure(&reason, &policy, Instant::now());
                    tracing::warn!(
                        provider = %id,
                        error = %reason,
                        consecutive_failures = health.consecutive_failures,
                        status = ?health.status,
                        "Provider attempt failed"
                    );
                    attempts.push(ProviderAttempt {
                        provider_id: id,
                        reason,
                    });
                }
            }
        }

        tracing::error!(attempts = attempts.len(), "All providers failed");
        Err(Error::ServiceUnavailable { attempts })
    }

    async fn attempt_order(&self, preferred: Option<&str>) -> Vec<String> {
        let priority = self.priority.read().await;
        match preferred.filter(|p| self.slots.contains_key(*p)) {
            Some(first) => std::iter::once(first.to_string())
                .chain(priority.iter().filter(|id| id.as_str() != first).cloned())
                .collect(),
            None => priority.clone(),
        }
    }

    /// Whether a provider id is registered.
    pub fn contains(&self, provider_id: &str) -> bool {
        self.slots.contains_key(provider_id)
    }

    /// Provider ids in current priority order.
    pub async fn priority(&self) -> Vec<String> {
        self.priority.read().await.clone()
    }

    /// Replace the priority order. Every id must be registered.
    pub async fn set_priority(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Err(Error::Config("no providers configured".to_string()));
        }
        if let Some(unknown) = ids.iter().find(|id| !self.slots.contains_key(id.as_str())) {
            return Err(Error::NotFound(format!("provider '{}'", unknown)));
        }
        *self.priority.write().await = ids.to_vec();
        tracing::info!(providers = ?ids, "Provider priority updated");
        Ok(())
    }

    /// Prefer `provider_id` for requests from `channel_id`.
    pub async fn set_preference(&self, channel_id: &str, provider_id: &str) -> Result<()> {
        if !self.contains(provider_id) {
            return Err(Error::NotFound(format!("provider '{}'", provider_id)));
        }
        self.preferences
            .write()
            .await
            .insert(channel_id.to_string(), provider_id.to_string());
        tracing::info!(channel_id = %channel_id, provider = %provider_id, "Preferred provider set");
        Ok(())
    }

    pub async fn clear_preference(&self, channel_id: &str) -> bool {
        self.preferences.write().await.remove(channel_id).is_some()
    }

    pub async fn preference(&self, channel_id: &str) -> Option<String> {
        self.preferences.read().await.get(channel_id).cloned()
    }

    pub async fn set_policy(&self, policy: HealthPolicy) {
        *self.policy.write().await = policy;
    }

    /// Health snapshots in priority order.
    pub async fn health(&self) -> Vec<HealthSnapshot> {
        let now = Instant::now();
        let order = self.priority.read().await.clone();
        let mut snapshots = Vec::with_capacity(order.len());
        for id in order {
            if let Some(slot) = self.slots.get(&id) {
                snapshots.push(slot.health.lock().await.snapshot(now));
            }
        }
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::ScriptedBackend;
    use crate::providers::HealthStatus;

    fn policy() -> HealthPolicy {
        HealthPolicy {
            failure_threshold: 3,
            backoff_base: Duration::from_secs(30),
            backoff_max: Duration::from_secs(600),
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn router(backends: &[&Arc<ScriptedBackend>]) -> ProviderRouter {
        let backends = backends
            .iter()
            .map(|b| (*b).clone() as Arc<dyn GenerationBackend>)
            .collect();
        ProviderRouter::new(backends, policy()).unwrap()
    }

    async fn health_of(router: &ProviderRouter, id: &str) -> HealthSnapshot {
        router
            .health()
            .await
            .into_iter()
            .find(|h| h.provider_id == id)
            .unwrap()
    }

    #[test]
    fn test_empty_router_is_config_error() {
        let err = ProviderRouter::new(Vec::new(), policy()).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_duplicate_id_is_config_error() {
        let a = ScriptedBackend::replying("a", "x");
        let b = ScriptedBackend::replying("a", "y");
        let backends: Vec<Arc<dyn GenerationBackend>> = vec![a, b];
        let err = ProviderRouter::new(backends, policy()).err().unwrap();
        assert!(err.to_string().contains("duplicate provider id"));
    }

    #[tokio::test]
    async fn test_fallback_to_second_provider() {
        let a = ScriptedBackend::failing("a", BackendError::Quota("out of credits".into()));
        let b = ScriptedBackend::replying("b", "from b");
        let router = router(&[&a, &b]);

        let completion = router.route("sys", &[], "hi", TIMEOUT).await.unwrap();
        assert_eq!(completion.text, "from b");
        assert_eq!(completion.provider_id, "b");

        let a_health = health_of(&router, "a").await;
        assert_eq!(a_health.consecutive_failures, 1);
        assert_eq!(a_health.status, HealthStatus::Degraded);
        assert_eq!(health_of(&router, "b").await.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_provider_skipped_after_threshold() {
        let a = ScriptedBackend::failing("a", BackendError::Transport("reset".into()));
        let b = ScriptedBackend::replying("b", "ok");
        let router = router(&[&a, &b]);

        for _ in 0..3 {
            router.route("sys", &[], "hi", TIMEOUT).await.unwrap();
        }
        assert_eq!(a.calls(), 3);
        assert_eq!(health_of(&router, "a").await.status, HealthStatus::Unavailable);

        router.route("sys", &[], "hi", TIMEOUT).await.unwrap();
        assert_eq!(a.calls(), 3);
        assert_eq!(b.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retried_after_cooldown_and_restored() {
        let a = ScriptedBackend::failing("a", BackendError::Authentication("bad key".into()));
        let b = ScriptedBackend::replying("b", "ok");
        let router = router(&[&a, &b]);

        for _ in 0..3 {
            router.route("sys", &[], "hi", TIMEOUT).await.unwrap();
        }
        a.reply_with("a is back");

        tokio::time::advance(Duration::from_secs(29)).await;
        let c = router.route("sys", &[], "hi", TIMEOUT).await.unwrap();
        assert_eq!(c.provider_id, "b");

        tokio::time::advance(Duration::from_secs(1)).await;
        let c = router.route("sys", &[], "hi", TIMEOUT).await.unwrap();
        assert_eq!(c.provider_id, "a");
        assert_eq!(c.text, "a is back");

        let a_health = health_of(&router, "a").await;
        assert_eq!(a_health.status, HealthStatus::Healthy);
        assert_eq!(a_health.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_increases_on_repeated_failure() {
        let a = ScriptedBackend::failing("a", BackendError::Other("500".into()));
        let b = ScriptedBackend::replying("b", "ok");
        let router = router(&[&a, &b]);

        for _ in 0..3 {
            router.route("sys", &[], "hi", TIMEOUT).await.unwrap();
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        router.route("sys", &[], "hi", TIMEOUT).await.unwrap();
        assert_eq!(a.calls(), 4);

        let a_health = health_of(&router, "a").await;
        assert_eq!(a_health.consecutive_failures, 4);
        assert_eq!(a_health.cooldown_remaining_secs, Some(60.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back() {
        let a = ScriptedBackend::hanging("a");
        let b = ScriptedBackend::replying("b", "fast");
        let router = router(&[&a, &b]);

        let completion = router
            .route("sys", &[], "hi", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(completion.provider_id, "b");
        assert_eq!(
            health_of(&router, "a").await.last_error.as_deref(),
            Some("request timed out after 2s")
        );
    }

    #[tokio::test]
    async fn test_all_failed_aggregate_error() {
        let a = ScriptedBackend::failing("a", BackendError::Quota("daily limit".into()));
        let b = ScriptedBackend::failing("b", BackendError::Transport("dns".into()));
        let router = router(&[&a, &b]);

        let err = router.route("sys", &[], "hi", TIMEOUT).await.unwrap_err();
        match err {
            Error::ServiceUnavailable { attempts } => {
                assert_eq!(
                    attempts,
                    vec![
                        ProviderAttempt {
                            provider_id: "a".into(),
                            reason: "quota exhausted: daily limit".into()
                        },
                        ProviderAttempt {
                            provider_id: "b".into(),
                            reason: "transport error: dns".into()
                        },
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_aggregate_names_cooling_down_providers() {
        let a = ScriptedBackend::failing("a", BackendError::Quota("x".into()));
        let router = router(&[&a]);
        for _ in 0..3 {
            let _ = router.route("sys", &[], "hi", TIMEOUT).await;
        }
        let err = router.route("sys", &[], "hi", TIMEOUT).await.unwrap_err();
        assert_eq!(err.to_string(), "Service unavailable: a: cooling down");
        assert_eq!(a.calls(), 3);
    }

    #[tokio::test]
    async fn test_preferred_provider_first() {
        let a = ScriptedBackend::replying("a", "from a");
        let b = ScriptedBackend::replying("b", "from b");
        let router = router(&[&a, &b]);

        let c = router
            .route_preferring(Some("b"), "sys", &[], "hi", TIMEOUT)
            .await
            .unwrap();
        assert_eq!(c.provider_id, "b");
        assert_eq!(a.calls(), 0);

        // unknown preference falls back to priority order
        let c = router
            .route_preferring(Some("zzz"), "sys", &[], "hi", TIMEOUT)
            .await
            .unwrap();
        assert_eq!(c.provider_id, "a");
    }

    #[tokio::test]
    async fn test_preferred_provider_failure_falls_back() {
        let a = ScriptedBackend::replying("a", "from a");
        let b = ScriptedBackend::failing("b", BackendError::Transport("down".into()));
        let router = router(&[&a, &b]);

        let c = router
            .route_preferring(Some("b"), "sys", &[], "hi", TIMEOUT)
            .await
            .unwrap();
        assert_eq!(c.provider_id, "a");
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_failures_counted_once_each() {
        let a = ScriptedBackend::failing("a", BackendError::Transport("x".into()));
        let b = ScriptedBackend::replying("b", "ok");
        let router = Arc::new(router(&[&a, &b]));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let router = router.clone();
            handles.push(tokio::spawn(async move {
                router.route("sys", &[], "hi", TIMEOUT).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let a_health = health_of(&router, "a").await;
        assert_eq!(a_health.consecutive_failures as usize, a.calls());
        assert_eq!(a_health.total_failures as usize, a.calls());
    }

    #[tokio::test]
    async fn test_channel_preference() {
        let a = ScriptedBackend::replying("a", "from a");
        let b = ScriptedBackend::replying("b", "from b");
        let router = router(&[&a, &b]);

        assert!(router.set_preference("c1", "nope").await.is_err());
        router.set_preference("c1", "b").await.unwrap();
        assert_eq!(router.preference("c1").await.as_deref(), Some("b"));
        assert!(router.preference("c2").await.is_none());

        assert!(router.clear_preference("c1").await);
        assert!(!router.clear_preference("c1").await);
    }

    #[tokio::test]
    async fn test_set_priority() {
        let a = ScriptedBackend::replying("a", "from a");
        let b = ScriptedBackend::replying("b", "from b");
        let router = router(&[&a, &b]);

        router
            .set_priority(&["b".to_string(), "a".to_string()])
            .await
            .unwrap();
        let c = router.route("sys", &[], "hi", TIMEOUT).await.unwrap();
        assert_eq!(c.provider_id, "b");

        let err = router.set_priority(&["c".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(router.priority().await, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_backend_receives_request() {
        let a = ScriptedBackend::replying("a", "ok");
        let router = router(&[&a]);
        let context = vec![ConversationTurn::user("earlier")];

        router
            .route("be nice", &context, "now", TIMEOUT)
            .await
            .unwrap();
        let request = a.last_request().unwrap();
        assert_eq!(request.system_prompt, "be nice");
        assert_eq!(request.context_len, 1);
        assert_eq!(request.prompt, "now");
    }
}
