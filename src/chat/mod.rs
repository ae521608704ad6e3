//! Request orchestration
//!
//! ```text
//! InboundMessage
//!   → RateLimiter::admit
//!   → PersonalityResolver::resolve
//!   → SafetyFilter::validate_input
//!   → MemoryManager::build_context
//!   → ProviderRouter::route_preferring
//!   → SafetyFilter::validate_output
//!   → MemoryManager::record_turns (user, assistant)
//!   → ChatReply
//! ```

mod service;
mod types;

pub use service::ChatService;
pub use types::{ChatReply, InboundMessage, PersonalitySummary, ProviderSummary, StatsSummary};
