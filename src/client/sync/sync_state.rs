//! # Sync State
//!
//! Derives the UI-facing [`SyncIndicator`] from the network snapshot and the
//! current queue length, and broadcasts it when it changes.

use std::sync::Mutex;

use super::network_monitor::NetworkState;
use crate::shared::event::{broadcast_event, SyncEvent, SyncEventBroadcast, SyncIndicator};

/// Pick the indicator for a snapshot
///
/// Precedence: offline, then syncing, then error, then queued work. An
/// unknown queue length (`None`) is treated as empty.
pub fn indicator_for(state: &NetworkState, pending: Option<usize>) -> SyncIndicator {
    if !state.is_online {
        SyncIndicator::Offline
    } else if state.is_syncing {
        SyncIndicator::Syncing
    } else if state.sync_error.is_some() {
        SyncIndicator::Error
    } else if pending.unwrap_or(0) > 0 {
        SyncIndicator::HasQueue
    } else {
        SyncIndicator::Online
    }
}

/// Remembers the last indicator sent so only transitions are broadcast
#[derive(Debug)]
pub struct IndicatorTracker {
    events: SyncEventBroadcast,
    last: Mutex<Option<SyncIndicator>>,
}

impl IndicatorTracker {
    pub fn new(events: SyncEventBroadcast) -> Self {
        Self {
            events,
            last: Mutex::new(None),
        }
    }

    /// Recompute and broadcast if it changed. Returns the current indicator.
    pub fn update(&self, state: &NetworkState, pending: Option<usize>) -> SyncIndicator {
        let indicator = indicator_for(state, pending);
        let changed = match self.last.lock() {
            Ok(mut last) => last.replace(indicator) != Some(indicator),
            Err(poisoned) => poisoned.into_inner().replace(indicator) != Some(indicator),
        };
        if changed {
            tracing::debug!(?indicator, "sync indicator changed");
            broadcast_event(&self.events, SyncEvent::status(indicator));
        }
        indicator
    }

    pub fn events(&self) -> &SyncEventBroadcast {
        &self.events
    }
}
