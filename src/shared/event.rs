//! Sync Events
//!
//! Events emitted to the presentation layer: sync-state transitions, cache
//! refresh notifications scoped by collection, and the summary of each replay
//! pass.
//!
//! # Broadcasting
//!
//! Events go out over `tokio::sync::broadcast`, so any number of UI
//! components can subscribe and each receives a copy. Sending with no
//! subscribers is not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::shared::records::Collection;

/// Coarse sync state rendered by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncIndicator {
    Offline,
    Syncing,
    Error,
    HasQueue,
    Online,
}

/// Outcome of one replay pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Entries whose remote call was attempted in this pass
    pub attempted: usize,
    /// Entries applied remotely and removed from the queue
    pub succeeded: usize,
    /// Entries that failed recoverably and stay pending
    pub retried: usize,
    /// Entries dropped after a non-recoverable failure
    pub abandoned: usize,
    /// Entries that exhausted their retries in this pass
    pub failed: usize,
    /// Terminal entries from earlier passes removed at the start of this one
    pub purged: usize,
    /// Whether the pass stopped before reaching the end of the queue
    pub interrupted: bool,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.interrupted
    }
}

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEventType {
    /// The coarse sync indicator changed
    Status { indicator: SyncIndicator },
    /// Fresh records for a collection were written to the cache
    CacheRefreshed { collection: Collection, records: usize },
    /// A replay pass finished
    ReplayFinished { report: SyncReport },
}

/// Event delivered to UI subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub event_type: SyncEventType,
    pub timestamp: DateTime<Utc>,
}

impl SyncEvent {
    pub fn new(event_type: SyncEventType) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
        }
    }

    pub fn status(indicator: SyncIndicator) -> Self {
        Self::new(SyncEventType::Status { indicator })
    }

    pub fn cache_refreshed(collection: Collection, records: usize) -> Self {
        Self::new(SyncEventType::CacheRefreshed { collection, records })
    }

    pub fn replay_finished(report: SyncReport) -> Self {
        Self::new(SyncEventType::ReplayFinished { report })
    }
}

/// Broadcast channel shared by every component that emits UI events
pub type SyncEventBroadcast = broadcast::Sender<SyncEvent>;

/// Create a broadcast channel sized for bursty replay passes
pub fn event_channel() -> SyncEventBroadcast {
    let (tx, _) = broadcast::channel(256);
    tx
}

/// Broadcast an event, returning how many subscribers received it
pub fn broadcast_event(broadcast_tx: &SyncEventBroadcast, event: SyncEvent) -> usize {
    match broadcast_tx.send(event) {
        Ok(subscriber_count) => subscriber_count,
        Err(_) => {
            tracing::trace!("sync event dropped: no subscribers");
            0
        }
    }
}
