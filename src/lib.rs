//! ChatGate - chat message-processing pipeline
//!
//! ChatGate brokers conversational requests between end users and one of
//! several interchangeable text-generation backends. It enforces admission
//! control, filters what goes in and out, keeps bounded short-term
//! conversation memory, and falls back across providers when one fails.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          ChatService                              │
//! │                                                                   │
//! │  InboundMessage                                                   │
//! │       │                                                           │
//! │  ┌────▼────────┐  ┌─────────────────────┐  ┌──────────────────┐  │
//! │  │ RateLimiter │─►│ PersonalityResolver │─►│  SafetyFilter    │  │
//! │  │ cooldown +  │  │ override → default  │  │  validate_input  │  │
//! │  │ global cap  │  │ → builtin           │  └────────┬─────────┘  │
//! │  └─────────────┘  └─────────────────────┘           │            │
//! │                                            ┌────────▼─────────┐  │
//! │                                            │  MemoryManager   │  │
//! │                                            │  build_context   │  │
//! │                                            └────────┬─────────┘  │
//! │  ┌──────────────────────────────────────────────────▼─────────┐  │
//! │  │                      ProviderRouter                         │  │
//! │  │  priority order · per-attempt timeout · health + cooldown   │  │
//! │  └──────────────────────────────────────────────────┬─────────┘  │
//! │                                            ┌────────▼─────────┐  │
//! │                                            │  SafetyFilter    │  │
//! │                                            │  validate_output │  │
//! │                                            └────────┬─────────┘  │
//! │                                            ┌────────▼─────────┐  │
//! │                                            │  MemoryManager   │  │
//! │                                            │  record_turn ────┼──┼─► writer task → JSON files
//! │                                            └────────┬─────────┘  │
//! │                                                     ▼            │
//! │                                                 ChatReply        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`chat`]: Orchestrator and request/reply records
//! - [`ratelimit`]: Per-key cooldown and global per-minute cap
//! - [`personality`]: Personas and channel bindings
//! - [`safety`]: Injection heuristics and output redaction
//! - [`memory`]: Bounded channel/group history and persistence
//! - [`providers`]: Backend interface, health tracking and fallback routing
//! - [`maintenance`]: Periodic sweep task
//! - [`config`]: Configuration management

pub mod chat;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod memory;
pub mod personality;
pub mod providers;
pub mod ratelimit;
pub mod safety;

pub use chat::{ChatReply, ChatService, InboundMessage};
pub use config::ChatGateConfig;
pub use error::{Error, Result};
