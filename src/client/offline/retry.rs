//! # Retry Policy
//!
//! Decides what happens to a queue entry after a failed replay attempt.
//!
//! - **Non-recoverable** failures (policy violation, permission denied,
//!   backend rejection) abandon the entry at once; its retry count is left
//!   untouched.
//! - **Recoverable** failures bump the retry count. The entry goes back to
//!   `pending` while the count is below the ceiling and becomes `failed` once
//!   it reaches it.
//!
//! There is no backoff timer: the next attempt happens on the next replay
//! pass, whichever trigger starts it.
//!
//! ## Usage
//!
//! ```rust
//! use eventsync::client::offline::retry::{FailureDisposition, RetryPolicy};
//! use eventsync::client::remote::{RemoteError, RemoteErrorKind};
//!
//! let policy = RetryPolicy::default();
//! let err = RemoteError::new(RemoteErrorKind::Network, "connection reset");
//!
//! assert_eq!(policy.classify(0, &err), FailureDisposition::Retry { retry_count: 1 });
//! assert_eq!(policy.classify(2, &err), FailureDisposition::Fail { retry_count: 3 });
//! ```

use crate::client::remote::RemoteError;

/// Default number of recoverable failures before an entry is given up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retry ceiling for queued operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Recoverable failures allowed before the entry becomes `failed`
    pub max_attempts: u32,
}

/// Outcome of classifying one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Will never succeed; drop the entry without counting a retry
    Abandon,
    /// Back to `pending` with the new count
    Retry { retry_count: u32 },
    /// Ceiling reached; terminal `failed` with the new count
    Fail { retry_count: u32 },
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Classify a failure given the entry's retry count before the attempt
    pub fn classify(&self, retry_count: u32, error: &RemoteError) -> FailureDisposition {
        if !error.is_recoverable() {
            return FailureDisposition::Abandon;
        }

        let retry_count = retry_count.saturating_add(1);
        if retry_count < self.max_attempts {
            FailureDisposition::Retry { retry_count }
        } else {
            FailureDisposition::Fail { retry_count }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}
