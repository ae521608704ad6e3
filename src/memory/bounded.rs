//! Bounded conversation history with oldest-first eviction and secure erasure
//!
//! After every mutation both bounds hold:
//! `len() <= max_turns` and `total_bytes() <= max_bytes`.
//! Evicted turns have their text zeroized before being dropped.

use super::store::{MemoryScope, PersistedMemory};
use super::turn::ConversationTurn;
use crate::config::MemoryBounds;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// History for one channel or one group.
#[derive(Debug)]
pub struct BoundedMemory {
    scope: MemoryScope,
    id: String,
    bounds: MemoryBounds,
    /// Chronological: front = oldest
    turns: VecDeque<ConversationTurn>,
    total_bytes: usize,
    /// Set once the manager has dropped this memory from its index
    retired: bool,
}

impl BoundedMemory {
    pub fn new(scope: MemoryScope, id: impl Into<String>, bounds: MemoryBounds) -> Self {
        Self {
            scope,
            id: id.into(),
            bounds,
            turns: VecDeque::new(),
            total_bytes: 0,
            retired: false,
        }
    }

    /// Rebuild from a persisted entry, applying the current bounds.
    pub fn from_persisted(persisted: PersistedMemory, bounds: MemoryBounds) -> Self {
        let mut memory = Self::new(persisted.scope, persisted.id, bounds);
        for turn in persisted.turns {
            let turn = turn.normalized();
            memory.total_bytes += turn.size_bytes();
            memory.turns.push_back(turn);
        }
        memory.enforce();
        memory
    }

    /// Append a turn, then evict from the head until both bounds hold.
    /// Returns the number of evicted turns.
    pub fn push(&mut self, turn: ConversationTurn) -> usize {
        self.total_bytes += turn.size_bytes();
        self.turns.push_back(turn);
        self.enforce()
    }

    /// Replace the bounds and evict as needed.
    pub fn set_bounds(&mut self, bounds: MemoryBounds) -> usize {
        if self.bounds == bounds {
            return 0;
        }
        self.bounds = bounds;
        self.enforce()
    }

    fn enforce(&mut self) -> usize {
        let mut evicted = 0;
        while self.turns.len() > self.bounds.max_turns || self.total_bytes > self.bounds.max_bytes
        {
            let Some(mut oldest) = self.turns.pop_front() else {
                break;
            };
            self.total_bytes -= oldest.size_bytes();
            oldest.erase();
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!(
                scope = %self.scope,
                id = %self.id,
                evicted,
                remaining = self.turns.len(),
                "Evicted oldest turns"
            );
        }
        evicted
    }

    pub fn scope(&self) -> MemoryScope {
        self.scope
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bounds(&self) -> MemoryBounds {
        self.bounds
    }

    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Timestamp of the newest turn.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.turns.back().map(|t| t.timestamp())
    }

    /// Serializable copy of the current state.
    pub fn snapshot(&self) -> PersistedMemory {
        PersistedMemory {
            scope: self.scope,
            id: self.id.clone(),
            max_turns: self.bounds.max_turns,
            max_bytes: self.bounds.max_bytes,
            turns: self.turns.iter().cloned().collect(),
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired
    }

    /// Mark as removed from the index and erase all turns.
    pub(crate) fn retire(&mut self) {
        self.retired = true;
        for turn in self.turns.iter_mut() {
            turn.erase();
        }
        self.turns.clear();
        self.total_bytes = 0;
    }
}
