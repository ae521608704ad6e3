//! Safety filter facade used by the chat pipeline

use super::injection::{InjectionCategory, InjectionDetector};
use super::redaction::{Redacted, Redactor};
use crate::config::SafetyConfig;
use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;

/// Why inbound text was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    Empty,
    TooLong { chars: usize, max: usize },
    Injection { category: InjectionCategory },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Empty => write!(f, "message is empty"),
            RejectReason::TooLong { chars, max } => {
                write!(f, "message too long ({} > {} characters)", chars, max)
            }
            RejectReason::Injection { category } => {
                write!(f, "possible prompt injection ({})", category)
            }
        }
    }
}

/// Outcome of input validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputVerdict {
    Accepted,
    Rejected(RejectReason),
}

impl InputVerdict {
    pub fn into_result(self) -> Result<()> {
        match self {
            InputVerdict::Accepted => Ok(()),
            InputVerdict::Rejected(reason) => Err(Error::Validation(reason)),
        }
    }
}

/// Validates inbound text and redacts outbound text.
pub struct SafetyFilter {
    max_input_chars: usize,
    injection: InjectionDetector,
    redactor: Redactor,
}

impl SafetyFilter {
    pub fn new(config: &SafetyConfig) -> Result<Self> {
        Ok(Self {
            max_input_chars: config.max_input_chars,
            injection: InjectionDetector::new(
                &config.extra_injection_patterns,
                config.detect_encoded,
            )?,
            redactor: Redactor::new()?,
        })
    }

    /// Check inbound text against the length cap and injection heuristics.
    pub fn validate_input(&self, text: &str) -> InputVerdict {
        if text.trim().is_empty() {
            return InputVerdict::Rejected(RejectReason::Empty);
        }

        let chars = text.chars().count();
        if chars > self.max_input_chars {
            return InputVerdict::Rejected(RejectReason::TooLong {
                chars,
                max: self.max_input_chars,
            });
        }

        if let Some(m) = self.injection.scan(text) {
            tracing::warn!(
                category = %m.category,
                position = m.position,
                "Prompt injection rejected"
            );
            return InputVerdict::Rejected(RejectReason::Injection {
                category: m.category,
            });
        }

        InputVerdict::Accepted
    }

    /// Redact sensitive tokens from provider output. Never fails.
    pub fn validate_output(&self, text: &str) -> Redacted {
        let redacted = self.redactor.redact(text);
        if !redacted.is_clean() {
            let categories: Vec<String> =
                redacted.findings.iter().map(ToString::to_string).collect();
            tracing::warn!(
                replacements = redacted.replacements,
                categories = %categories.join(","),
                "Sensitive content redacted from provider output"
            );
        }
        redacted
    }
}
