//! Generation backend interface

use crate::memory::ConversationTurn;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single backend call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("{0}")]
    Other(String),
}

/// A text-generation backend.
///
/// `timeout` is advisory for the backend; the router also bounds the call
/// and cancels it when the deadline passes.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Stable provider id, matched against `providers.priority`.
    fn id(&self) -> &str;

    async fn send(
        &self,
        system_prompt: &str,
        context: &[ConversationTurn],
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, BackendError>;
}
