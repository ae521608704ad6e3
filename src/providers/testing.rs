//! Scripted backends for tests

use super::backend::{BackendError, GenerationBackend};
use crate::memory::ConversationTurn;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Behavior {
    Reply(String),
    Fail(BackendError),
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedRequest {
    pub system_prompt: String,
    pub context_len: usize,
    pub prompt: String,
}

/// Backend with a fixed, switchable behavior that counts its calls.
pub(crate) struct ScriptedBackend {
    id: String,
    behavior: Mutex<Behavior>,
    calls: AtomicUsize,
    last_request: Mutex<Option<RecordedRequest>>,
}

impl ScriptedBackend {
    fn with(id: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        })
    }

    pub(crate) fn replying(id: &str, text: &str) -> Arc<Self> {
        Self::with(id, Behavior::Reply(text.to_string()))
    }

    pub(crate) fn failing(id: &str, error: BackendError) -> Arc<Self> {
        Self::with(id, Behavior::Fail(error))
    }

    pub(crate) fn hanging(id: &str) -> Arc<Self> {
        Self::with(id, Behavior::Hang)
    }

    pub(crate) fn reply_with(&self, text: &str) {
        *self.behavior.lock().unwrap() = Behavior::Reply(text.to_string());
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_request(&self) -> Option<RecordedRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(
        &self,
        system_prompt: &str,
        context: &[ConversationTurn],
        prompt: &str,
        _timeout: Duration,
    ) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(RecordedRequest {
            system_prompt: system_prompt.to_string(),
            context_len: context.len(),
            prompt: prompt.to_string(),
        });

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Reply(text) => Ok(text),
            Behavior::Fail(error) => Err(error),
            Behavior::Hang => futures::future::pending().await,
        }
    }
}
