//! Conversation turn record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// A single utterance in a conversation.
///
/// Immutable once created; `size_bytes` is the UTF-8 length of `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    speaker: Speaker,
    text: String,
    timestamp: DateTime<Utc>,
    size_bytes: usize,
    /// Origin channel, set on copies held by group memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel_id: Option<String>,
}

impl ConversationTurn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self::at(speaker, text, Utc::now())
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Speaker::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Speaker::Assistant, text)
    }

    /// Create a turn with an explicit timestamp.
    pub fn at(speaker: Speaker, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let text = text.into();
        Self {
            speaker,
            size_bytes: text.len(),
            text,
            timestamp,
            channel_id: None,
        }
    }

    /// Copy of this turn stamped with its origin channel.
    pub fn with_channel(&self, channel_id: &str) -> Self {
        Self {
            channel_id: Some(channel_id.to_string()),
            ..self.clone()
        }
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    /// Recompute the byte size after deserialization.
    pub(crate) fn normalized(mut self) -> Self {
        self.size_bytes = self.text.len();
        self
    }

    /// Overwrite the text buffer before the turn is dropped.
    pub(crate) fn erase(&mut self) {
        self.text.zeroize();
        self.size_bytes = 0;
    }
}
