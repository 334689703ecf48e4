//! # Sync Engine Settings and State
//!
//! Shared pieces of the offline-first sync engine:
//!
//! - **Network Monitor**: connectivity, connection quality, sync progress
//! - **Sync State**: the coarse indicator rendered by the UI
//! - [`SyncConfig`]: tunables for replay, reads and probing
//! - [`SyncError`]: the error type of the public sync API
//!
//! ## Usage
//!
//! ```rust
//! use eventsync::client::sync::SyncConfig;
//! use std::time::Duration;
//!
//! let config = SyncConfig {
//!     settle_delay: Duration::from_millis(250),
//!     ..SyncConfig::default()
//! };
//! assert!(config.auto_sync);
//! assert_eq!(config.max_retry_attempts, 3);
//! ```

pub mod network_monitor;
pub mod sync_state;

pub use network_monitor::{
    ConnectionQuality, Connectivity, ConnectivitySource, HttpProbe, ManualConnectivity, NetworkMonitor, NetworkState,
};
pub use sync_state::{indicator_for, IndicatorTracker};

use std::time::Duration;
use thiserror::Error;

use crate::client::local_db::StoreError;
use crate::client::offline::retry::DEFAULT_MAX_ATTEMPTS;
use crate::client::remote::RemoteError;
use crate::shared::error::SharedError;

/// Configuration for the sync engine
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Replay automatically on offline→online (the stored preference can
    /// still switch it off)
    pub auto_sync: bool,
    /// Wait after reconnecting before an automatic replay
    pub settle_delay: Duration,
    /// Recoverable failures before a queued entry becomes `failed`
    pub max_retry_attempts: u32,
    /// Deadline for each remote call
    pub request_timeout: Duration,
    /// Default page size for reads
    pub page_size: u32,
    /// Interval between connectivity probes
    pub probe_interval: Duration,
    /// Skip background refresh on a poor connection
    pub skip_refresh_on_poor: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync: true,
            settle_delay: Duration::from_secs(1),
            max_retry_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: Duration::from_secs(15),
            page_size: 20,
            probe_interval: Duration::from_secs(30),
            skip_refresh_on_poor: true,
        }
    }
}

/// Errors surfaced by the sync engine's public operations
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("invalid operation: {0}")]
    Invalid(#[from] SharedError),
}

impl SyncError {
    /// Whether the failure came from local storage
    pub fn is_store(&self) -> bool {
        matches!(self, SyncError::Store(_))
    }
}
