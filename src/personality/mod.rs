//! Personality resolution: which persona answers in a channel
//!
//! Personalities come from configuration and are immutable after load.
//! The channel → personality binding is mutable at runtime but is never
//! persisted; a reload resets it to the configured overrides.

mod resolver;
mod types;

pub use resolver::PersonalityResolver;
pub use types::{PersonalityConfig, PersonalitySource, ResolvedPersonality, BUILTIN_DEFAULT_KEY};
