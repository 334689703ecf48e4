//! # Network Monitor
//!
//! The single authoritative answer to "can we talk to the remote API right
//! now". State lives in a `tokio::sync::watch` channel so every subscriber
//! sees the latest snapshot and can await transitions.
//!
//! Raw connectivity comes from a [`ConnectivitySource`]:
//!
//! - [`ManualConnectivity`]: driven by the embedding platform (OS network
//!   events, tests)
//! - [`HttpProbe`]: times a request to the backend's health endpoint and
//!   derives connection quality from the round trip
//!
//! [`NetworkMonitor::spawn_watch`] keeps the monitor in step with a source.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Coarse connection quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    #[default]
    Unknown,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl ConnectionQuality {
    /// Bucket a measured round trip
    pub fn from_latency(latency: Duration) -> Self {
        match latency.as_millis() {
            0..=149 => ConnectionQuality::Excellent,
            150..=399 => ConnectionQuality::Good,
            400..=999 => ConnectionQuality::Fair,
            _ => ConnectionQuality::Poor,
        }
    }
}

/// Snapshot of everything the monitor knows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkState {
    pub is_online: bool,
    pub connection_quality: ConnectionQuality,
    /// A replay pass is running
    pub is_syncing: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Last aggregate replay error, cleared by a clean pass
    pub sync_error: Option<String>,
}

/// One reading from a connectivity source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Connectivity {
    pub is_online: bool,
    pub quality: ConnectionQuality,
}

impl Connectivity {
    pub fn online(quality: ConnectionQuality) -> Self {
        Self {
            is_online: true,
            quality,
        }
    }

    pub fn offline() -> Self {
        Self {
            is_online: false,
            quality: ConnectionQuality::Unknown,
        }
    }
}

/// Where raw connectivity readings come from
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    /// Take a fresh reading
    async fn check(&self) -> Connectivity;

    /// Push notifications for sources that know about changes as they
    /// happen. Polled sources return `None`.
    fn changes(&self) -> Option<watch::Receiver<Connectivity>> {
        None
    }
}

/// Connectivity set explicitly by the embedding platform
#[derive(Debug, Clone)]
pub struct ManualConnectivity {
    tx: Arc<watch::Sender<Connectivity>>,
}

impl ManualConnectivity {
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, connectivity: Connectivity) {
        self.tx.send_replace(connectivity);
    }
}

#[async_trait]
impl ConnectivitySource for ManualConnectivity {
    async fn check(&self) -> Connectivity {
        *self.tx.borrow()
    }

    fn changes(&self) -> Option<watch::Receiver<Connectivity>> {
        Some(self.tx.subscribe())
    }
}

/// Health-endpoint probe
///
/// Any successful response counts as reachable; transport failures and 5xx
/// responses count as offline.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl ConnectivitySource for HttpProbe {
    async fn check(&self) -> Connectivity {
        let started = Instant::now();
        match self.client.get(&self.url).send().await {
            Ok(response) if !response.status().is_server_error() => {
                let quality = ConnectionQuality::from_latency(started.elapsed());
                tracing::trace!(url = %self.url, ?quality, "health probe succeeded");
                Connectivity::online(quality)
            }
            Ok(response) => {
                tracing::debug!(url = %self.url, status = %response.status(), "health probe got server error");
                Connectivity::offline()
            }
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "health probe failed");
                Connectivity::offline()
            }
        }
    }
}

/// Shared connectivity and sync-progress state
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    state: Arc<watch::Sender<NetworkState>>,
}

impl NetworkMonitor {
    /// Starts offline with unknown quality until a source reports in
    pub fn new() -> Self {
        Self::with_state(NetworkState::default())
    }

    pub fn with_state(state: NetworkState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self { state: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> NetworkState {
        self.state.borrow().clone()
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().is_online
    }

    pub fn connection_quality(&self) -> ConnectionQuality {
        self.state.borrow().connection_quality
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.state.subscribe()
    }

    pub fn set_online(&self, online: bool) {
        self.state.send_if_modified(|state| {
            if state.is_online == online {
                return false;
            }
            tracing::info!(online, "connectivity changed");
            state.is_online = online;
            if !online {
                state.connection_quality = ConnectionQuality::Unknown;
            }
            true
        });
    }

    pub fn set_quality(&self, quality: ConnectionQuality) {
        self.state.send_if_modified(|state| {
            let changed = state.connection_quality != quality;
            state.connection_quality = quality;
            changed
        });
    }

    /// Apply one reading from a source
    pub fn apply(&self, connectivity: Connectivity) {
        self.set_online(connectivity.is_online);
        if connectivity.is_online {
            self.set_quality(connectivity.quality);
        }
    }

    pub fn set_syncing(&self, syncing: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.is_syncing != syncing;
            state.is_syncing = syncing;
            changed
        });
    }

    pub fn record_sync_success(&self, at: DateTime<Utc>) {
        self.state.send_modify(|state| {
            state.last_sync_time = Some(at);
            state.sync_error = None;
        });
    }

    pub fn record_sync_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.state.send_modify(|state| state.sync_error = Some(error));
    }

    pub fn clear_sync_error(&self) {
        self.state.send_if_modified(|state| state.sync_error.take().is_some());
    }

    /// Keep this monitor in step with `source`
    ///
    /// Takes a reading immediately, then on every `interval` tick and on
    /// every push notification the source offers. The task runs until it is
    /// aborted.
    pub fn spawn_watch(&self, source: Arc<dyn ConnectivitySource>, interval: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut changes = source.changes();

            loop {
                let closed = match changes.as_mut() {
                    Some(rx) => tokio::select! {
                        _ = ticker.tick() => false,
                        changed = rx.changed() => changed.is_err(),
                    },
                    None => {
                        ticker.tick().await;
                        false
                    }
                };
                if closed {
                    // source dropped its sender; fall back to polling
                    changes = None;
                    continue;
                }

                monitor.apply(source.check().await);
            }
        })
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}
