//! Personality wire types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Key of the personality that always exists.
pub const BUILTIN_DEFAULT_KEY: &str = "default";

const BUILTIN_SYSTEM_PROMPT: &str =
    "You are a friendly and helpful assistant. Keep answers short and clear.";

/// A named persona: system prompt plus metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalityConfig {
    pub key: String,
    pub display_name: String,
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    #[serde(default)]
    pub allowed_features: BTreeSet<String>,
}

impl PersonalityConfig {
    /// The builtin `default` personality, built from the legacy single
    /// system prompt when one is configured.
    pub fn builtin_default(legacy_prompt: Option<&str>) -> Self {
        let system_prompt = legacy_prompt
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(BUILTIN_SYSTEM_PROMPT)
            .to_string();

        Self {
            key: BUILTIN_DEFAULT_KEY.to_string(),
            display_name: "Default".to_string(),
            system_prompt,
            tone: None,
            allowed_features: BTreeSet::new(),
        }
    }
}

/// Which link of the priority chain produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonalitySource {
    ChannelOverride,
    ConfiguredDefault,
    Builtin,
}

/// Result of resolving a channel's personality.
#[derive(Debug, Clone)]
pub struct ResolvedPersonality {
    pub config: Arc<PersonalityConfig>,
    pub source: PersonalitySource,
}

impl ResolvedPersonality {
    pub fn key(&self) -> &str {
        &self.config.key
    }
}
