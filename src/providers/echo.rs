//! Loopback backend for local smoke testing

use super::backend::{BackendError, GenerationBackend};
use crate::memory::ConversationTurn;
use async_trait::async_trait;
use std::time::Duration;

/// Replies with the prompt it was given. Makes no network calls.
pub struct EchoBackend {
    id: String,
}

impl EchoBackend {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl GenerationBackend for EchoBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(
        &self,
        _system_prompt: &str,
        context: &[ConversationTurn],
        prompt: &str,
        _timeout: Duration,
    ) -> Result<String, BackendError> {
        Ok(format!(
            "[{} | {} turns of context] {}",
            self.id,
            context.len(),
            prompt
        ))
    }
}
