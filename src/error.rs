//! ChatGate error types

use crate::providers::ProviderAttempt;
use crate::ratelimit::LimitScope;
use crate::safety::RejectReason;
use std::time::Duration;
use thiserror::Error;

/// ChatGate error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inbound text rejected by the safety filter
    #[error("Input rejected: {0}")]
    Validation(RejectReason),

    /// Caller or global admission denied
    #[error("Rate limit exceeded ({scope}), retry after {:.1}s", .retry_after.as_secs_f64())]
    RateLimited {
        retry_after: Duration,
        scope: LimitScope,
    },

    /// Every eligible provider failed or was cooling down
    #[error("Service unavailable: {}", format_attempts(.attempts))]
    ServiceUnavailable { attempts: Vec<ProviderAttempt> },

    /// Unknown personality or provider key
    #[error("Not found: {0}")]
    NotFound(String),

    /// Persistence error (non-fatal for request handling)
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl Error {
    /// Whether the error message may be shown to the end user as-is.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::RateLimited { .. } | Error::NotFound(_)
        )
    }

    /// Retry-after hint for rate-limit denials.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

fn format_attempts(attempts: &[ProviderAttempt]) -> String {
    if attempts.is_empty() {
        return "no providers attempted".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.provider_id, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for ChatGate operations
pub type Result<T> = std::result::Result<T, Error>;
