//! # Queued Operations
//!
//! Entries of the durable mutation queue and the transitions between their
//! states.
//!
//! ## Lifecycle
//!
//! ```text
//! pending ──▶ processing ──▶ completed (removed)
//!                 │
//!                 ├──▶ pending   (recoverable failure, retries left)
//!                 └──▶ failed    (retries exhausted; purged next pass)
//! ```
//!
//! A non-recoverable failure removes the entry straight from `processing`
//! without touching its retry count.
//!
//! ## Usage
//!
//! ```rust
//! use eventsync::client::offline::queue::{QueuedOperation, QueueStatus};
//! use eventsync::shared::{Mutation, RecordRef};
//!
//! let op = QueuedOperation::new(Mutation::DeleteEvent(RecordRef { id: "e1".into() }));
//! assert_eq!(op.status, QueueStatus::Pending);
//! assert_eq!(op.retry_count, 0);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::shared::error::SharedError;
use crate::shared::records::{Collection, Mutation, OperationKind};

/// A pending write awaiting execution against the remote API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Locally generated id, unique within the queue
    pub id: String,
    /// The typed write
    pub mutation: Mutation,
    /// Current status
    pub status: QueueStatus,
    /// Number of recoverable failures so far
    pub retry_count: u32,
    /// Error message from the last failure
    pub error: Option<String>,
    /// When the entry was queued
    pub created_at: DateTime<Utc>,
    /// When the last replay attempt started
    pub last_attempt: Option<DateTime<Utc>>,
}

impl QueuedOperation {
    /// A fresh `pending` entry with a generated id
    pub fn new(mutation: Mutation) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mutation,
            status: QueueStatus::Pending,
            retry_count: 0,
            error: None,
            created_at: Utc::now(),
            last_attempt: None,
        }
    }

    pub fn operation(&self) -> OperationKind {
        self.mutation.operation()
    }

    pub fn table(&self) -> Collection {
        self.mutation.collection()
    }

    /// Merge a partial update in place
    pub fn apply(&mut self, update: &QueuedUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(retry_count) = update.retry_count {
            self.retry_count = retry_count;
        }
        if let Some(error) = &update.error {
            self.error = error.clone();
        }
        if let Some(last_attempt) = update.last_attempt {
            self.last_attempt = Some(last_attempt);
        }
    }
}

/// Queue entry status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for a replay pass
    Pending,
    /// A replay attempt is in flight
    Processing,
    /// Applied remotely; removed right after
    Completed,
    /// Retries exhausted; terminal
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(SharedError::validation("status", format!("unknown queue status '{other}'"))),
        }
    }
}

/// Partial field update for a queue entry
///
/// `error: Some(None)` clears the stored error; `error: None` leaves it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueuedUpdate {
    pub status: Option<QueueStatus>,
    pub retry_count: Option<u32>,
    pub error: Option<Option<String>>,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl QueuedUpdate {
    pub fn status(status: QueueStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Entry picked up by a replay pass
    pub fn processing(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(QueueStatus::Processing),
            last_attempt: Some(now),
            ..Default::default()
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Total entries in the queue
    pub total_operations: usize,
    /// Waiting for a pass
    pub pending: usize,
    /// Attempt in flight (or interrupted by a crash)
    pub processing: usize,
    /// Applied but not yet removed
    pub completed: usize,
    /// Terminal, awaiting purge
    pub failed: usize,
}

impl QueueStats {
    pub fn from_operations(operations: &[QueuedOperation]) -> Self {
        let mut stats = QueueStats {
            total_operations: operations.len(),
            ..Default::default()
        };
        for op in operations {
            match op.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Processing => stats.processing += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Entries that still need a remote call
    pub fn outstanding(&self) -> usize {
        self.pending + self.processing
    }
}
