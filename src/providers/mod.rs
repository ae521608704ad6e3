//! Generation backends and health-aware routing
//!
//! Every backend implements [`GenerationBackend`]. The [`ProviderRouter`]
//! walks the priority list, skips providers in cooldown, bounds each call
//! with a timeout and falls back on failure.

mod backend;
mod echo;
mod health;
mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{BackendError, GenerationBackend};
pub use echo::EchoBackend;
pub use health::{HealthPolicy, HealthSnapshot, HealthStatus, ProviderHealth};
pub use router::{Completion, ProviderAttempt, ProviderRouter};
