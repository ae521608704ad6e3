//! Channel and group memory ownership
//!
//! Every channel and group has its own `Arc<Mutex<BoundedMemory>>`, so
//! mutations of one scope are serialized while different scopes proceed
//! concurrently. The index maps are only write-locked to insert or remove
//! entries.

use super::bounded::BoundedMemory;
use super::store::{MemoryScope, MemoryStore};
use super::turn::ConversationTurn;
use super::writer::{PersistenceStats, PersistenceWriter};
use crate::config::{MemoryBounds, MemoryConfig};
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

type SharedMemory = Arc<Mutex<BoundedMemory>>;
type ScopeIndex = RwLock<HashMap<String, SharedMemory>>;

/// Aggregate memory counters
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub channels: usize,
    pub groups: usize,
    pub total_turns: usize,
    pub total_bytes: usize,
    pub persistence: PersistenceStats,
}

/// Result of a retention sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub channels_removed: usize,
    pub groups_removed: usize,
    /// Scopes skipped because a request held their lock
    pub busy_skipped: usize,
}

/// Owns all channel and group memories.
pub struct MemoryManager {
    channels: ScopeIndex,
    groups: ScopeIndex,
    config: RwLock<MemoryConfig>,
    writer: Option<PersistenceWriter>,
}

impl MemoryManager {
    /// Memory-only manager with no persistence.
    pub fn in_memory(config: &MemoryConfig) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            config: RwLock::new(config.clone()),
            writer: None,
        }
    }

    /// Load persisted memories and start the persistence writer.
    ///
    /// Unreadable storage is logged and the manager starts empty.
    pub async fn load(config: &MemoryConfig, store: Arc<dyn MemoryStore>) -> Self {
        let mut manager = Self::in_memory(config);

        for (scope, bounds) in [
            (MemoryScope::Channel, config.channel),
            (MemoryScope::Group, config.group),
        ] {
            match store.load_all(scope).await {
                Ok(items) => {
                    let mut index = manager.index(scope).write().await;
                    for persisted in items {
                        let memory = BoundedMemory::from_persisted(persisted, bounds);
                        index.insert(memory.id().to_string(), Arc::new(Mutex::new(memory)));
                    }
                    tracing::info!(scope = %scope, count = index.len(), "Loaded persisted memory");
                }
                Err(e) => {
                    tracing::warn!(
                        scope = %scope,
                        error = %e,
                        "Persisted memory unreadable, starting empty"
                    );
                }
            }
        }

        manager.writer = Some(PersistenceWriter::spawn(store));
        manager
    }

    fn index(&self, scope: MemoryScope) -> &ScopeIndex {
        match scope {
            MemoryScope::Channel => &self.channels,
            MemoryScope::Group => &self.groups,
        }
    }

    async fn get(&self, scope: MemoryScope, id: &str) -> Option<SharedMemory> {
        self.index(scope).read().await.get(id).cloned()
    }

    async fn get_or_create(
        &self,
        scope: MemoryScope,
        id: &str,
        bounds: MemoryBounds,
    ) -> SharedMemory {
        if let Some(memory) = self.get(scope, id).await {
            return memory;
        }
        self.index(scope)
            .write()
            .await
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BoundedMemory::new(scope, id, bounds))))
            .clone()
    }

    /// Append a turn to the channel memory and, when given, the group
    /// memory, then schedule persistence of both.
    pub async fn record_turn(
        &self,
        channel_id: &str,
        group_id: Option<&str>,
        turn: ConversationTurn,
    ) {
        self.record_turns(channel_id, group_id, vec![turn]).await;
    }

    /// Append consecutive turns as one unit: each scope's lock is held
    /// across the whole batch, so concurrent requests in a channel never
    /// interleave inside it.
    pub async fn record_turns(
        &self,
        channel_id: &str,
        group_id: Option<&str>,
        turns: Vec<ConversationTurn>,
    ) {
        if turns.is_empty() {
            return;
        }
        let (channel_bounds, group_bounds) = {
            let config = self.config.read().await;
            (config.channel, config.group)
        };

        if let Some(group_id) = group_id {
            let stamped = turns.iter().map(|t| t.with_channel(channel_id)).collect();
            self.append(MemoryScope::Group, group_id, stamped, group_bounds)
                .await;
        }
        self.append(MemoryScope::Channel, channel_id, turns, channel_bounds)
            .await;
    }

    async fn append(
        &self,
        scope: MemoryScope,
        id: &str,
        turns: Vec<ConversationTurn>,
        bounds: MemoryBounds,
    ) {
        loop {
            let shared = self.get_or_create(scope, id, bounds).await;
            let mut memory = shared.lock().await;
            if memory.is_retired() {
                // Removed by cleanup or clear between lookup and lock
                continue;
            }
            memory.set_bounds(bounds);
            for turn in turns {
                memory.push(turn);
            }
            let snapshot = memory.snapshot();
            drop(memory);

            if let Some(writer) = &self.writer {
                writer.save(snapshot);
            }
            return;
        }
    }

    /// Prompt context for a request: group turns from other channels,
    /// then this channel's turns, capped from the most recent end by the
    /// per-request context bounds.
    pub async fn build_context(
        &self,
        channel_id: &str,
        group_id: Option<&str>,
    ) -> Vec<ConversationTurn> {
        let limit = self.config.read().await.context;

        let mut combined: Vec<ConversationTurn> = Vec::new();
        if let Some(group_id) = group_id {
            if let Some(shared) = self.get(MemoryScope::Group, group_id).await {
                let memory = shared.lock().await;
                combined.extend(
                    memory
                        .turns()
                        .filter(|t| t.channel_id() != Some(channel_id))
                        .cloned(),
                );
            }
        }
        if let Some(shared) = self.get(MemoryScope::Channel, channel_id).await {
            let memory = shared.lock().await;
            combined.extend(memory.turns().cloned());
        }

        cap_from_end(combined, limit)
    }

    /// Drop a channel's history and its persisted entry.
    pub async fn clear_channel(&self, channel_id: &str) -> bool {
        let removed = self.channels.write().await.remove(channel_id);
        let Some(shared) = removed else {
            return false;
        };
        shared.lock().await.retire();
        if let Some(writer) = &self.writer {
            writer.delete(MemoryScope::Channel, channel_id);
        }
        tracing::info!(channel_id = %channel_id, "Channel history cleared");
        true
    }

    /// Remove every scope whose newest turn is older than `retention_days`.
    ///
    /// Scopes locked by an in-flight request are skipped until the next run.
    pub async fn cleanup(&self, retention_days: u32) -> CleanupReport {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let mut report = CleanupReport::default();

        for scope in [MemoryScope::Channel, MemoryScope::Group] {
            let mut index = self.index(scope).write().await;
            let mut expired = Vec::new();

            for (id, shared) in index.iter() {
                let Ok(mut memory) = shared.try_lock() else {
                    report.busy_skipped += 1;
                    continue;
                };
                let stale = memory.last_activity().map_or(true, |t| t < cutoff);
                if stale {
                    memory.retire();
                    expired.push(id.clone());
                }
            }

            for id in &expired {
                index.remove(id);
                if let Some(writer) = &self.writer {
                    writer.delete(scope, id);
                }
            }

            match scope {
                MemoryScope::Channel => report.channels_removed = expired.len(),
                MemoryScope::Group => report.groups_removed = expired.len(),
            }
        }

        if report.channels_removed + report.groups_removed > 0 {
            tracing::info!(
                channels = report.channels_removed,
                groups = report.groups_removed,
                retention_days,
                "Expired conversation memory removed"
            );
        }
        report
    }

    /// Replace bounds; existing memories adopt them on their next mutation.
    pub async fn set_config(&self, config: &MemoryConfig) {
        *self.config.write().await = config.clone();
    }

    pub async fn retention_days(&self) -> u32 {
        self.config.read().await.retention_days
    }

    /// Chronological copy of a channel's stored turns.
    pub async fn channel_turns(&self, channel_id: &str) -> Vec<ConversationTurn> {
        self.scope_turns(MemoryScope::Channel, channel_id).await
    }

    /// Chronological copy of a group's stored turns.
    pub async fn group_turns(&self, group_id: &str) -> Vec<ConversationTurn> {
        self.scope_turns(MemoryScope::Group, group_id).await
    }

    async fn scope_turns(&self, scope: MemoryScope, id: &str) -> Vec<ConversationTurn> {
        match self.get(scope, id).await {
            Some(shared) => shared.lock().await.turns().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn stats(&self) -> MemoryStats {
        let mut stats = MemoryStats {
            channels: 0,
            groups: 0,
            total_turns: 0,
            total_bytes: 0,
            persistence: self
                .writer
                .as_ref()
                .map(PersistenceWriter::stats)
                .unwrap_or(PersistenceStats {
                    enabled: false,
                    healthy: true,
                    ..Default::default()
                }),
        };

        for scope in [MemoryScope::Channel, MemoryScope::Group] {
            let memories: Vec<SharedMemory> =
                self.index(scope).read().await.values().cloned().collect();
            match scope {
                MemoryScope::Channel => stats.channels = memories.len(),
                MemoryScope::Group => stats.groups = memories.len(),
            }
            for shared in memories {
                let memory = shared.lock().await;
                stats.total_turns += memory.len();
                stats.total_bytes += memory.total_bytes();
            }
        }
        stats
    }

    /// Wait for queued persistence to be applied.
    pub async fn flush(&self) {
        if let Some(writer) = &self.writer {
            writer.flush().await;
        }
    }
}

/// Keep the longest suffix that fits both bounds.
fn cap_from_end(turns: Vec<ConversationTurn>, limit: MemoryBounds) -> Vec<ConversationTurn> {
    let mut kept = VecDeque::new();
    let mut bytes = 0;
    for turn in turns.into_iter().rev() {
        if kept.len() >= limit.max_turns || bytes + turn.size_bytes() > limit.max_bytes {
            break;
        }
        bytes += turn.size_bytes();
        kept.push_front(turn);
    }
    kept.into()
}
