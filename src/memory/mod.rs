//! Conversation memory: bounded history per channel and per group
//!
//! ```text
//! record_turn ─┬─► group memory   (stamped with origin channel)
//!              └─► channel memory
//!                       │ snapshot
//!                       ▼
//!              PersistenceWriter ──► MemoryStore (JSON files)
//! ```

mod bounded;
mod manager;
pub mod store;
mod turn;
mod writer;

pub use bounded::BoundedMemory;
pub use manager::{CleanupReport, MemoryManager, MemoryStats};
pub use store::{JsonFileStore, MemoryScope, MemoryStore, PersistedMemory};
pub use turn::{ConversationTurn, Speaker};
pub use writer::PersistenceStats;
