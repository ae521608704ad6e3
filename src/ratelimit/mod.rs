//! Admission control per caller and globally
//!
//! Two independent checks run under one lock so a decision and its
//! bookkeeping are atomic with respect to concurrent admits:
//!
//! - per-key cooldown: at most one admitted request per `cooldown`
//! - global cap: at most `global_per_minute` admitted requests in any
//!   rolling 60s window
//!
//! Idle keys are dropped by [`RateLimiter::sweep`], driven by the
//! maintenance task.

use crate::config::{RateLimitConfig, RateLimitKeyScope};
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const GLOBAL_WINDOW: Duration = Duration::from_secs(60);

/// Which check denied a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    Caller,
    Global,
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitScope::Caller => write!(f, "caller cooldown"),
            LimitScope::Global => write!(f, "global limit"),
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied {
        retry_after: Duration,
        scope: LimitScope,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }

    /// Convert a denial into [`Error::RateLimited`].
    pub fn into_result(self) -> Result<()> {
        match self {
            Admission::Allowed => Ok(()),
            Admission::Denied { retry_after, scope } => {
                Err(Error::RateLimited { retry_after, scope })
            }
        }
    }
}

/// Build the cooldown key for a request under the configured scope.
pub fn limit_key(scope: RateLimitKeyScope, caller_id: &str, channel_id: &str) -> String {
    match scope {
        RateLimitKeyScope::Caller => caller_id.to_string(),
        RateLimitKeyScope::Channel => format!("channel:{}", channel_id),
        RateLimitKeyScope::CallerInChannel => format!("{}@{}", caller_id, channel_id),
    }
}

/// Global counters
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    pub requests_last_minute: usize,
    pub limit_per_minute: u32,
    pub cooldown_secs: f64,
    pub total_allowed: u64,
    pub total_blocked: u64,
    pub tracked_callers: usize,
}

/// Per-key counters
#[derive(Debug, Clone, Serialize)]
pub struct CallerStats {
    pub request_count: u64,
    pub denied_count: u64,
    pub secs_since_last_request: f64,
}

#[derive(Debug)]
struct CallerEntry {
    last_request: Instant,
    last_seen: Instant,
    request_count: u64,
    denied_count: u64,
}

#[derive(Debug)]
struct LimiterState {
    cooldown: Duration,
    global_per_minute: u32,
    callers: HashMap<String, CallerEntry>,
    /// Accepted timestamps, oldest first
    window: VecDeque<Instant>,
    total_allowed: u64,
    total_blocked: u64,
}

impl LimiterState {
    fn prune_window(&mut self, now: Instant) {
        while let Some(&oldest) = self.window.front() {
            if now.saturating_duration_since(oldest) >= GLOBAL_WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-caller cooldown plus a global rolling-minute cap.
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a limiter.
    pub fn new(cooldown: Duration, global_per_minute: u32) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                cooldown,
                global_per_minute,
                callers: HashMap::new(),
                window: VecDeque::new(),
                total_allowed: 0,
                total_blocked: 0,
            }),
        }
    }

    /// Create a limiter from configuration.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            Duration::from_secs(config.cooldown_secs),
            config.global_requests_per_minute,
        )
    }

    /// Admit or deny a request for `caller_id` now.
    pub async fn admit(&self, caller_id: &str) -> Admission {
        self.admit_at(caller_id, Instant::now()).await
    }

    /// Admit or deny a request for `caller_id` at `now`.
    pub async fn admit_at(&self, caller_id: &str, now: Instant) -> Admission {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.prune_window(now);
        let cooldown = state.cooldown;

        if let Some(entry) = state.callers.get_mut(caller_id) {
            let elapsed = now.saturating_duration_since(entry.last_request);
            entry.last_seen = now;
            if elapsed < cooldown {
                entry.denied_count += 1;
                state.total_blocked += 1;
                tracing::debug!(caller_id = %caller_id, "Caller cooldown active");
                return Admission::Denied {
                    retry_after: cooldown - elapsed,
                    scope: LimitScope::Caller,
                };
            }
        }

        if state.window.len() >= state.global_per_minute as usize {
            let retry_after = state
                .window
                .front()
                .map(|&oldest| GLOBAL_WINDOW.saturating_sub(now.saturating_duration_since(oldest)))
                .unwrap_or(GLOBAL_WINDOW);
            if let Some(entry) = state.callers.get_mut(caller_id) {
                entry.denied_count += 1;
            }
            state.total_blocked += 1;
            tracing::warn!(
                caller_id = %caller_id,
                limit = state.global_per_minute,
                "Global request limit reached"
            );
            return Admission::Denied {
                retry_after,
                scope: LimitScope::Global,
            };
        }

        state.window.push_back(now);
        state.total_allowed += 1;
        let entry = state
            .callers
            .entry(caller_id.to_string())
            .or_insert(CallerEntry {
                last_request: now,
                last_seen: now,
                request_count: 0,
                denied_count: 0,
            });
        entry.last_request = now;
        entry.last_seen = now;
        entry.request_count += 1;

        Admission::Allowed
    }

    /// Drop keys not seen within `retention`. Returns how many were removed.
    pub async fn sweep(&self, retention: Duration) -> usize {
        self.sweep_at(retention, Instant::now()).await
    }

    pub async fn sweep_at(&self, retention: Duration, now: Instant) -> usize {
        let mut state = self.state.lock().await;
        state.prune_window(now);
        let before = state.callers.len();
        state
            .callers
            .retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= retention);
        before - state.callers.len()
    }

    /// Replace cooldown and global cap, keeping tracked callers.
    pub async fn update_limits(&self, cooldown: Duration, global_per_minute: u32) {
        let mut state = self.state.lock().await;
        state.cooldown = cooldown;
        state.global_per_minute = global_per_minute;
    }

    /// Forget one caller's cooldown. Returns whether it was tracked.
    pub async fn reset_caller(&self, caller_id: &str) -> bool {
        self.state.lock().await.callers.remove(caller_id).is_some()
    }

    /// Forget every caller and the global window.
    pub async fn reset_all(&self) {
        let mut state = self.state.lock().await;
        state.callers.clear();
        state.window.clear();
    }

    pub async fn global_stats(&self) -> GlobalStats {
        let mut state = self.state.lock().await;
        state.prune_window(Instant::now());
        GlobalStats {
            requests_last_minute: state.window.len(),
            limit_per_minute: state.global_per_minute,
            cooldown_secs: state.cooldown.as_secs_f64(),
            total_allowed: state.total_allowed,
            total_blocked: state.total_blocked,
            tracked_callers: state.callers.len(),
        }
    }

    pub async fn caller_stats(&self, caller_id: &str) -> Option<CallerStats> {
        let state = self.state.lock().await;
        state.callers.get(caller_id).map(|entry| CallerStats {
            request_count: entry.request_count,
            denied_count: entry.denied_count,
            secs_since_last_request: entry.last_request.elapsed().as_secs_f64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[tokio::test]
    async fn test_cooldown_denies_then_allows() {
        let limiter = RateLimiter::new(secs(3), 100);
        let t0 = Instant::now();

        assert!(limiter.admit_at("u1", t0).await.is_allowed());

        match limiter.admit_at("u1", t0 + secs(1)).await {
            Admission::Denied { retry_after, scope } => {
                assert_eq!(scope, LimitScope::Caller);
                assert_eq!(retry_after, secs(2));
            }
            Admission::Allowed => panic!("expected cooldown denial"),
        }

        assert!(limiter.admit_at("u1", t0 + secs(4)).await.is_allowed());
    }

    #[tokio::test]
    async fn test_denial_does_not_extend_cooldown() {
        let limiter = RateLimiter::new(secs(3), 100);
        let t0 = Instant::now();
        limiter.admit_at("u1", t0).await;
        assert!(!limiter.admit_at("u1", t0 + secs(2)).await.is_allowed());
        assert!(limiter.admit_at("u1", t0 + secs(3)).await.is_allowed());
    }

    #[tokio::test]
    async fn test_callers_are_independent() {
        let limiter = RateLimiter::new(secs(3), 100);
        let t0 = Instant::now();
        assert!(limiter.admit_at("u1", t0).await.is_allowed());
        assert!(limiter.admit_at("u2", t0).await.is_allowed());
    }

    #[tokio::test]
    async fn test_global_cap() {
        let limiter = RateLimiter::new(Duration::ZERO, 2);
        let t0 = Instant::now();
        assert!(limiter.admit_at("a", t0).await.is_allowed());
        assert!(limiter.admit_at("b", t0 + secs(10)).await.is_allowed());

        match limiter.admit_at("c", t0 + secs(20)).await {
            Admission::Denied { retry_after, scope } => {
                assert_eq!(scope, LimitScope::Global);
                assert_eq!(retry_after, secs(40));
            }
            Admission::Allowed => panic!("expected global denial"),
        }

        // First accepted timestamp leaves the window
        assert!(limiter.admit_at("c", t0 + secs(60)).await.is_allowed());
    }

    #[tokio::test]
    async fn test_global_denial_does_not_start_caller_cooldown() {
        let limiter = RateLimiter::new(secs(3), 1);
        let t0 = Instant::now();
        limiter.admit_at("a", t0).await;
        assert!(!limiter.admit_at("b", t0).await.is_allowed());
        assert!(limiter.caller_stats("b").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_admits_same_caller() {
        let limiter = Arc::new(RateLimiter::new(secs(3), 100));
        let t0 = Instant::now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.admit_at("u1", t0).await })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let allowed = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Admission::Allowed)))
            .count();
        assert_eq!(allowed, 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_idle_callers() {
        let limiter = RateLimiter::new(secs(3), 100);
        let t0 = Instant::now();
        limiter.admit_at("old", t0).await;
        limiter.admit_at("fresh", t0 + secs(3000)).await;

        let removed = limiter.sweep_at(secs(3600), t0 + secs(3700)).await;
        assert_eq!(removed, 1);
        assert!(limiter.caller_stats("old").await.is_none());
        assert!(limiter.caller_stats("fresh").await.is_some());
    }

    #[tokio::test]
    async fn test_reset_caller() {
        let limiter = RateLimiter::new(secs(3), 100);
        let t0 = Instant::now();
        limiter.admit_at("u1", t0).await;
        assert!(limiter.reset_caller("u1").await);
        assert!(limiter.admit_at("u1", t0 + secs(1)).await.is_allowed());
    }

    #[tokio::test]
    async fn test_stats() {
        let limiter = RateLimiter::new(secs(3), 100);
        let t0 = Instant::now();
        limiter.admit_at("u1", t0).await;
        limiter.admit_at("u1", t0).await;

        let global = limiter.global_stats().await;
        assert_eq!(global.total_allowed, 1);
        assert_eq!(global.total_blocked, 1);
        assert_eq!(global.tracked_callers, 1);

        let caller = limiter.caller_stats("u1").await.unwrap();
        assert_eq!(caller.request_count, 1);
        assert_eq!(caller.denied_count, 1);
    }

    #[tokio::test]
    async fn test_update_limits() {
        let limiter = RateLimiter::new(secs(3), 100);
        let t0 = Instant::now();
        limiter.admit_at("u1", t0).await;
        limiter.update_limits(secs(1), 100).await;
        assert!(limiter.admit_at("u1", t0 + secs(1)).await.is_allowed());
    }

    #[test]
    fn test_limit_key_scopes() {
        assert_eq!(limit_key(RateLimitKeyScope::Caller, "u", "c"), "u");
        assert_eq!(limit_key(RateLimitKeyScope::Channel, "u", "c"), "channel:c");
        assert_eq!(limit_key(RateLimitKeyScope::CallerInChannel, "u", "c"), "u@c");
    }

    #[test]
    fn test_denied_into_result() {
        let denied = Admission::Denied {
            retry_after: secs(2),
            scope: LimitScope::Caller,
        };
        let err = denied.into_result().unwrap_err();
        assert_eq!(err.retry_after(), Some(secs(2)));
        assert!(Admission::Allowed.into_result().is_ok());
    }
}
