//! Per-provider health tracking and cooldown backoff

use crate::config::ProvidersConfig;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Provider availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No failures since the last success
    Healthy,
    /// Failing, but below the threshold
    Degraded,
    /// At or past the threshold; skipped until the cooldown elapses
    Unavailable,
}

/// Failure threshold and backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub failure_threshold: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl HealthPolicy {
    pub fn from_config(config: &ProvidersConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            backoff_base: Duration::from_secs(config.backoff_base_secs),
            backoff_max: Duration::from_secs(config.backoff_max_secs),
        }
    }

    /// Cooldown after `failures` consecutive failures:
    /// `base * 2^(failures - threshold)`, capped at `max`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(self.failure_threshold).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::from_config(&ProvidersConfig::default())
    }
}

/// Health record for one provider. Only the router mutates it.
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub consecutive_failures: u32,
    pub cooldown_until: Option<Instant>,
    pub status: HealthStatus,
    pub total_requests: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    /// Smoothed latency of successful calls
    pub avg_latency: Option<Duration>,
}

impl ProviderHealth {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            consecutive_failures: 0,
            cooldown_until: None,
            status: HealthStatus::Healthy,
            total_requests: 0,
            total_failures: 0,
            last_error: None,
            avg_latency: None,
        }
    }

    /// Whether the router should attempt this provider at `now`.
    pub fn is_eligible(&self, now: Instant) -> bool {
        match (self.status, self.cooldown_until) {
            (HealthStatus::Unavailable, Some(until)) => now >= until,
            _ => true,
        }
    }

    pub fn record_success(&mut self, latency: Duration) {
        self.total_requests += 1;
        self.consecutive_failures = 0;
        self.cooldown_until = None;
        self.status = HealthStatus::Healthy;
        self.avg_latency = Some(match self.avg_latency {
            Some(avg) => avg.mul_f64(0.9) + latency.mul_f64(0.1),
            None => latency,
        });
    }

    pub fn record_failure(&mut self, error: &str, policy: &HealthPolicy, now: Instant) {
        self.total_requests += 1;
        self.total_failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.to_string());

        if self.consecutive_failures >= policy.failure_threshold {
            self.status = HealthStatus::Unavailable;
            self.cooldown_until = Some(now + policy.backoff(self.consecutive_failures));
        } else {
            self.status = HealthStatus::Degraded;
        }
    }

    /// Serializable view relative to `now`.
    pub fn snapshot(&self, now: Instant) -> HealthSnapshot {
        HealthSnapshot {
            provider_id: self.provider_id.clone(),
            status: self.status,
            consecutive_failures: self.consecutive_failures,
            cooldown_remaining_secs: self
                .cooldown_until
                .map(|until| until.saturating_duration_since(now).as_secs_f64())
                .filter(|secs| *secs > 0.0),
            total_requests: self.total_requests,
            total_failures: self.total_failures,
            last_error: self.last_error.clone(),
            avg_latency_ms: self.avg_latency.map(|d| d.as_millis() as u64),
        }
    }
}

/// Provider health as reported to operators
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub provider_id: String,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub cooldown_remaining_secs: Option<f64>,
    pub total_requests: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub avg_latency_ms: Option<u64>,
}
