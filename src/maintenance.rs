//! Periodic maintenance: rate-limiter sweep and memory retention cleanup

use crate::memory::{CleanupReport, MemoryManager};
use crate::ratelimit::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub callers_swept: usize,
    pub memory: CleanupReport,
}

/// Components the sweep touches.
#[derive(Clone)]
pub struct MaintenanceTargets {
    pub rate_limiter: Arc<RateLimiter>,
    pub memory: Arc<MemoryManager>,
    pub caller_retention: Duration,
}

/// Run a single maintenance pass.
pub async fn run_once(targets: &MaintenanceTargets) -> MaintenanceReport {
    let callers_swept = targets.rate_limiter.sweep(targets.caller_retention).await;
    let retention_days = targets.memory.retention_days().await;
    let memory = targets.memory.cleanup(retention_days).await;

    tracing::debug!(
        callers_swept,
        channels_removed = memory.channels_removed,
        groups_removed = memory.groups_removed,
        busy_skipped = memory.busy_skipped,
        "Maintenance pass complete"
    );
    MaintenanceReport {
        callers_swept,
        memory,
    }
}

/// Spawn the background maintenance loop. The first pass runs one
/// `interval` after start; the loop exits when `cancel` fires.
pub fn spawn(
    targets: MaintenanceTargets,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Maintenance task stopped");
                    break;
                }
                _ = ticker.tick() => {
                    run_once(&targets).await;
                }
            }
        }
    })
}
