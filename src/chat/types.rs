//! Request, reply and status records exchanged with the event source

use crate::memory::MemoryStats;
use crate::providers::HealthSnapshot;
use crate::ratelimit::GlobalStats;
use crate::safety::RedactionCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub caller_id: String,
    pub channel_id: String,
    /// Coarser grouping (e.g. server); `None` for direct messages
    #[serde(default)]
    pub group_id: Option<String>,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        caller_id: impl Into<String>,
        channel_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            caller_id: caller_id.into(),
            channel_id: channel_id.into(),
            group_id: None,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }
}

/// Successful reply
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub request_id: Uuid,
    /// Redacted completion text
    pub text: String,
    pub personality_key: String,
    pub provider_id: String,
    /// Sensitive categories removed from the completion
    pub redactions: Vec<RedactionCategory>,
}

/// Personality list entry
#[derive(Debug, Clone, Serialize)]
pub struct PersonalitySummary {
    pub key: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    pub allowed_features: Vec<String>,
    /// Active for the channel the summary was requested for
    pub active: bool,
}

/// Provider list entry
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    /// Zero-based position in the priority order
    pub position: usize,
    /// Preferred for the channel the summary was requested for
    pub preferred: bool,
    #[serde(flatten)]
    pub health: HealthSnapshot,
}

/// Service-wide counters
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub rate_limits: GlobalStats,
    pub memory: MemoryStats,
    pub providers: Vec<HealthSnapshot>,
}
