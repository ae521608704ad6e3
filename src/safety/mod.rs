//! Input validation and output redaction
//!
//! ```text
//! inbound text  → SafetyFilter::validate_input  → Accepted | Rejected(reason)
//!                    ├─ empty / length cap
//!                    └─ InjectionDetector (phrases + encoded payloads)
//!
//! provider text → SafetyFilter::validate_output → (redacted text, findings)
//!                    └─ Redactor (one matcher per sensitive category)
//! ```

mod filter;
mod injection;
mod redaction;

pub use filter::{InputVerdict, RejectReason, SafetyFilter};
pub use injection::{InjectionCategory, InjectionDetector, InjectionMatch};
pub use redaction::{Redacted, RedactionCategory, Redactor};
