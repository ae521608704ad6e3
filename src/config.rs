//! ChatGate configuration management
//!
//! The whole structure is immutable once loaded. A reload produces a new
//! `ChatGateConfig` that replaces the previous one wholesale.

use crate::error::{Error, Result};
use crate::personality::PersonalityConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main ChatGate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatGateConfig {
    /// Personalities in load order
    pub personalities: Vec<PersonalityConfig>,

    /// Personality used when a channel has no override
    pub default_personality: Option<String>,

    /// Channel id → personality key
    pub channel_overrides: HashMap<String, String>,

    /// Legacy single system prompt, used for the builtin `default` personality
    pub system_prompt: Option<String>,

    /// Generation backend routing
    pub providers: ProvidersConfig,

    /// Admission control
    pub rate_limiting: RateLimitConfig,

    /// Conversation memory bounds
    pub memory: MemoryConfig,

    /// Input/output filtering
    pub safety: SafetyConfig,

    /// Persistence
    pub storage: StorageConfig,

    /// Background sweep
    pub maintenance: MaintenanceConfig,
}

impl ChatGateConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Check the invariants the service needs before accepting requests.
    ///
    /// Unknown personality keys are only warned about: the resolver falls
    /// back to the builtin default.
    pub fn validate(&self) -> Result<()> {
        if self.providers.priority.is_empty() {
            return Err(Error::Config("no providers configured".to_string()));
        }

        let mut seen = HashSet::new();
        for id in &self.providers.priority {
            if id.trim().is_empty() {
                return Err(Error::Config("provider id must not be empty".to_string()));
            }
            if !seen.insert(id.as_str()) {
                return Err(Error::Config(format!("duplicate provider id '{}'", id)));
            }
        }

        if self.providers.timeout_secs == 0 {
            return Err(Error::Config("providers.timeout_secs must be > 0".to_string()));
        }
        if self.providers.failure_threshold == 0 {
            return Err(Error::Config(
                "providers.failure_threshold must be > 0".to_string(),
            ));
        }
        if self.rate_limiting.global_requests_per_minute == 0 {
            return Err(Error::Config(
                "rate_limiting.global_requests_per_minute must be > 0".to_string(),
            ));
        }
        if self.safety.max_input_chars == 0 {
            return Err(Error::Config("safety.max_input_chars must be > 0".to_string()));
        }
        for (name, bounds) in [
            ("channel", &self.memory.channel),
            ("group", &self.memory.group),
            ("context", &self.memory.context),
        ] {
            if bounds.max_turns == 0 || bounds.max_bytes == 0 {
                return Err(Error::Config(format!(
                    "memory.{} bounds must be > 0",
                    name
                )));
            }
        }

        let mut keys = HashSet::new();
        for p in &self.personalities {
            if !keys.insert(p.key.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate personality key '{}'",
                    p.key
                )));
            }
        }

        if let Some(default) = &self.default_personality {
            if !keys.contains(default.as_str()) && default != crate::personality::BUILTIN_DEFAULT_KEY
            {
                tracing::warn!(key = %default, "default_personality is not a configured personality");
            }
        }
        for (channel, key) in &self.channel_overrides {
            if !keys.contains(key.as_str()) && key != crate::personality::BUILTIN_DEFAULT_KEY {
                tracing::warn!(channel_id = %channel, key = %key, "Channel override names an unknown personality");
            }
        }

        Ok(())
    }
}

/// Provider routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Provider ids in priority order
    pub priority: Vec<String>,

    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,

    /// Consecutive failures before a provider is marked unavailable
    pub failure_threshold: u32,

    /// First cooldown after crossing the threshold, in seconds
    pub backoff_base_secs: u64,

    /// Cooldown cap in seconds
    pub backoff_max_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            priority: Vec::new(),
            timeout_secs: 30,
            failure_threshold: 3,
            backoff_base_secs: 30,
            backoff_max_secs: 600,
        }
    }
}

impl ProvidersConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which identity a rate-limit cooldown is tracked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKeyScope {
    /// One cooldown per caller across all channels
    #[default]
    Caller,
    /// One cooldown per channel shared by all callers
    Channel,
    /// One cooldown per caller per channel
    CallerInChannel,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Minimum seconds between two admitted requests for one key
    pub cooldown_secs: u64,

    /// Accepted requests allowed in any rolling minute
    pub global_requests_per_minute: u32,

    /// What a cooldown key identifies
    pub scope: RateLimitKeyScope,

    /// Keys idle longer than this are swept
    pub caller_retention_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 3,
            global_requests_per_minute: 60,
            scope: RateLimitKeyScope::Caller,
            caller_retention_secs: 3600,
        }
    }
}

/// Turn and byte bounds for one memory scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBounds {
    pub max_turns: usize,
    pub max_bytes: usize,
}

/// Conversation memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Stored bound per channel
    pub channel: MemoryBounds,

    /// Stored bound per group (server)
    pub group: MemoryBounds,

    /// Per-request cap on the assembled prompt context
    pub context: MemoryBounds,

    /// Scopes idle longer than this are removed by the sweep
    pub retention_days: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            channel: MemoryBounds {
                max_turns: 20,
                max_bytes: 32 * 1024,
            },
            group: MemoryBounds {
                max_turns: 50,
                max_bytes: 64 * 1024,
            },
            context: MemoryBounds {
                max_turns: 12,
                max_bytes: 12 * 1024,
            },
            retention_days: 30,
        }
    }
}

/// Safety filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Hard cap on inbound text, in characters
    pub max_input_chars: usize,

    /// Additional case-insensitive injection phrases
    pub extra_injection_patterns: Vec<String>,

    /// Reject base64 blocks that decode to an injection phrase
    pub detect_encoded: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 2000,
            extra_injection_patterns: Vec::new(),
            detect_encoded: true,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for persisted memory
    pub base_dir: PathBuf,

    /// Persist memory at all (false = memory-only)
    pub persist: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: dirs_next::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("chatgate")
                .join("memory"),
            persist: true,
        }
    }
}

/// Background maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Seconds between sweeps
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
        }
    }
}
