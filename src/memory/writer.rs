//! Background persistence queue
//!
//! Request handlers enqueue snapshots and return immediately. A single
//! writer task drains the queue, keeps only the newest pending command per
//! key, and applies them through the [`MemoryStore`]. A key whose last
//! write failed keeps operating in memory only until a later write for it
//! succeeds.

use super::store::{MemoryScope, MemoryStore, PersistedMemory};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type Key = (MemoryScope, String);

enum PersistCommand {
    Save(PersistedMemory),
    Delete { scope: MemoryScope, id: String },
    Flush(oneshot::Sender<()>),
}

enum PendingOp {
    Save(PersistedMemory),
    Delete,
}

/// Persistence counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct PersistenceStats {
    pub enabled: bool,
    /// No key is currently failing
    pub healthy: bool,
    pub failing_scopes: usize,
    pub writes: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    failing: AtomicUsize,
    writes: AtomicU64,
    failures: AtomicU64,
}

/// Handle to the writer task.
pub(crate) struct PersistenceWriter {
    tx: mpsc::UnboundedSender<PersistCommand>,
    counters: Arc<Counters>,
}

impl PersistenceWriter {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub(crate) fn spawn(store: Arc<dyn MemoryStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        tokio::spawn(run(store, rx, counters.clone()));
        Self { tx, counters }
    }

    pub(crate) fn save(&self, memory: PersistedMemory) {
        self.send(PersistCommand::Save(memory));
    }

    pub(crate) fn delete(&self, scope: MemoryScope, id: &str) {
        self.send(PersistCommand::Delete {
            scope,
            id: id.to_string(),
        });
    }

    /// Wait until every command queued before this call has been applied.
    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(PersistCommand::Flush(done_tx));
        let _ = done_rx.await;
    }

    pub(crate) fn stats(&self) -> PersistenceStats {
        let failing = self.counters.failing.load(Ordering::Relaxed);
        PersistenceStats {
            enabled: true,
            healthy: failing == 0,
            failing_scopes: failing,
            writes: self.counters.writes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    fn send(&self, command: PersistCommand) {
        if self.tx.send(command).is_err() {
            tracing::warn!("Persistence writer has stopped; change kept in memory only");
        }
    }
}

async fn run(
    store: Arc<dyn MemoryStore>,
    mut rx: mpsc::UnboundedReceiver<PersistCommand>,
    counters: Arc<Counters>,
) {
    let mut failing: HashSet<Key> = HashSet::new();

    while let Some(first) = rx.recv().await {
        // Coalesce everything already queued
        let mut order: Vec<Key> = Vec::new();
        let mut pending: HashMap<Key, PendingOp> = HashMap::new();
        let mut waiters = Vec::new();

        let mut next = Some(first);
        while let Some(command) = next {
            let (key, op) = match command {
                PersistCommand::Save(memory) => {
                    ((memory.scope, memory.id.clone()), PendingOp::Save(memory))
                }
                PersistCommand::Delete { scope, id } => ((scope, id), PendingOp::Delete),
                PersistCommand::Flush(done) => {
                    waiters.push(done);
                    next = rx.try_recv().ok();
                    continue;
                }
            };
            if pending.insert(key.clone(), op).is_none() {
                order.push(key);
            }
            next = rx.try_recv().ok();
        }

        for key in order {
            let Some(op) = pending.remove(&key) else {
                continue;
            };
            let result = match &op {
                PendingOp::Save(memory) => store.save(memory).await,
                PendingOp::Delete => store.delete(key.0, &key.1).await,
            };
            counters.writes.fetch_add(1, Ordering::Relaxed);

            match result {
                Ok(()) => {
                    if failing.remove(&key) {
                        tracing::info!(
                            scope = %key.0,
                            id = %key.1,
                            "Persistence recovered"
                        );
                    }
                }
                Err(e) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    if failing.insert(key.clone()) {
                        tracing::warn!(
                            scope = %key.0,
                            id = %key.1,
                            error = %e,
                            "Failed to persist memory; continuing in memory only"
                        );
                    } else {
                        tracing::debug!(scope = %key.0, id = %key.1, error = %e, "Persist retry failed");
                    }
                }
            }
            counters.failing.store(failing.len(), Ordering::Relaxed);
        }

        for done in waiters {
            let _ = done.send(());
        }
    }

    tracing::debug!("Persistence writer stopped");
}
