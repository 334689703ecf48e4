//! # Offline Write Path
//!
//! Every create, update and delete goes through the [`SyncCoordinator`]. It
//! decides between immediate execution and the durable queue, and it owns the
//! replay loop that drains the queue once connectivity returns.
//!
//! ## Architecture
//!
//! - `queue.rs`: queue entries and their state transitions
//! - `retry.rs`: retry ceiling and failure classification
//!
//! The coordinator holds its collaborators by injection: a [`Store`], a
//! [`RemoteApi`] and a [`NetworkMonitor`]. All guard state is per instance,
//! so independent coordinators never interfere.
//!
//! ## Replay
//!
//! A pass replays pending entries strictly one at a time in creation order.
//! Only one pass runs at a time; a concurrent request returns
//! [`ReplayOutcome::AlreadyRunning`]. Cancelling a pass stops the scheduling
//! of the next entry; the entry in flight always finishes.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use eventsync::client::local_db::MemoryStore;
//! use eventsync::client::offline::{SyncCoordinator, WriteOutcome};
//! use eventsync::client::remote::HttpRemote;
//! use eventsync::client::sync::NetworkMonitor;
//! use eventsync::client::config::Config;
//! use eventsync::shared::{EventRecord, Mutation};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let coordinator = Arc::new(SyncCoordinator::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(HttpRemote::new(&config)?),
//!     NetworkMonitor::new(),
//!     config.sync().clone(),
//! ));
//! let _auto = coordinator.spawn_auto_sync();
//!
//! let outcome = coordinator
//!     .queue_operation(Mutation::CreateEvent(EventRecord::new("e1", "Launch party")))
//!     .await?;
//! if let WriteOutcome::Queued { id } = outcome {
//!     println!("offline; queued as {id}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod queue;
pub mod retry;

pub use queue::{QueueStats, QueueStatus, QueuedOperation, QueuedUpdate};
pub use retry::{FailureDisposition, RetryPolicy};

use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::client::local_db::{CachedRecord, Preferences, Store, SyncStatusUpdate};
use crate::client::remote::{RemoteApi, RemoteError};
use crate::client::sync::{IndicatorTracker, NetworkMonitor, SyncConfig, SyncError};
use crate::shared::event::{broadcast_event, event_channel, SyncEvent, SyncEventBroadcast, SyncIndicator, SyncReport};
use crate::shared::records::{Mutation, OperationKind};

/// What happened to a write handed to the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Executed remotely right away
    Applied,
    /// Durable locally only; will be replayed
    Queued { id: String },
}

impl WriteOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, WriteOutcome::Queued { .. })
    }
}

/// Result of asking for a replay pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Another pass holds the in-flight guard
    AlreadyRunning,
    /// Not attempted while offline
    Offline,
    /// The pass ran (possibly over an empty queue)
    Completed(SyncReport),
}

/// Counts from a maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Cached records past their horizon
    pub evicted: u64,
    /// Terminal `failed` queue entries
    pub purged: usize,
}

/// Releases the in-flight flag and the monitor's syncing flag when the pass
/// ends, however it ends. An aborted pass never reaches its own cleanup.
struct ReplayGuard<'a> {
    flag: &'a AtomicBool,
    monitor: &'a NetworkMonitor,
}

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.monitor.set_syncing(false);
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Single authority for writes and queue replay
pub struct SyncCoordinator {
    store: Arc<dyn Store>,
    remote: Arc<dyn RemoteApi>,
    monitor: NetworkMonitor,
    config: SyncConfig,
    policy: RetryPolicy,
    /// Set while a replay pass is running
    replaying: AtomicBool,
    /// Stop scheduling entries in the current pass
    cancel_requested: AtomicBool,
    indicator: IndicatorTracker,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("config", &self.config)
            .field("replaying", &self.replaying.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        remote: Arc<dyn RemoteApi>,
        monitor: NetworkMonitor,
        config: SyncConfig,
    ) -> Self {
        Self::with_events(store, remote, monitor, config, event_channel())
    }

    /// Share an existing event channel (e.g. with a data source)
    pub fn with_events(
        store: Arc<dyn Store>,
        remote: Arc<dyn RemoteApi>,
        monitor: NetworkMonitor,
        config: SyncConfig,
        events: SyncEventBroadcast,
    ) -> Self {
        Self {
            store,
            remote,
            monitor,
            policy: RetryPolicy::new(config.max_retry_attempts),
            config,
            replaying: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            indicator: IndicatorTracker::new(events),
        }
    }

    pub fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn events(&self) -> SyncEventBroadcast {
        self.indicator.events().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.indicator.events().subscribe()
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying.load(Ordering::SeqCst)
    }

    /// Execute a write now if online, otherwise (or on failure) queue it
    ///
    /// Only a failure to queue is an error: the write is then neither applied
    /// nor durable.
    pub async fn queue_operation(&self, mutation: Mutation) -> Result<WriteOutcome, SyncError> {
        if self.monitor.is_online() {
            match self.call_remote(&mutation).await {
                Ok(representation) => {
                    self.write_through(&mutation, representation).await;
                    tracing::debug!(
                        operation = %mutation.operation(),
                        table = %mutation.collection(),
                        id = mutation.record_id(),
                        "write applied immediately"
                    );
                    return Ok(WriteOutcome::Applied);
                }
                Err(e) => {
                    tracing::warn!(
                        operation = %mutation.operation(),
                        table = %mutation.collection(),
                        error = %e,
                        "immediate write failed; queueing"
                    );
                }
            }
        }

        let id = self.store.enqueue(&mutation).await?;
        tracing::debug!(%id, operation = %mutation.operation(), table = %mutation.collection(), "write queued");
        self.refresh_indicator().await;
        Ok(WriteOutcome::Queued { id })
    }

    /// [`queue_operation`](Self::queue_operation) for a loosely shaped write
    pub async fn queue_raw(&self, operation: OperationKind, table: &str, data: Value) -> Result<WriteOutcome, SyncError> {
        let mutation = Mutation::from_parts(operation, table, data)?;
        self.queue_operation(mutation).await
    }

    /// Run one replay pass over the queue
    pub async fn process_queue(&self) -> Result<ReplayOutcome, SyncError> {
        if self
            .replaying
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("replay already in flight");
            return Ok(ReplayOutcome::AlreadyRunning);
        }
        let _guard = ReplayGuard {
            flag: &self.replaying,
            monitor: &self.monitor,
        };
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.clear_stale_in_progress().await;

        if !self.monitor.is_online() {
            tracing::debug!("offline; replay skipped");
            return Ok(ReplayOutcome::Offline);
        }

        let result = self.replay_pass().await;

        self.monitor.set_syncing(false);
        if let Err(e) = self.store.set_sync_status(SyncStatusUpdate::in_progress(false)).await {
            tracing::warn!(error = %e, "failed to clear in-progress flag");
        }
        self.refresh_indicator().await;

        if let Err(e) = &result {
            tracing::error!(error = %e, "replay pass aborted");
            self.monitor.record_sync_error(e.to_string());
        }
        result
    }

    /// Manual "sync now": replays regardless of the auto-sync preference
    pub async fn sync_now(&self) -> Result<ReplayOutcome, SyncError> {
        tracing::info!("manual sync requested");
        self.process_queue().await
    }

    /// Stop the current pass after the entry in flight
    ///
    /// Returns whether a pass was running.
    pub fn cancel_replay(&self) -> bool {
        let running = self.is_replaying();
        if running {
            self.cancel_requested.store(true, Ordering::SeqCst);
        }
        running
    }

    /// Only one pass runs at a time, so a persisted in-progress flag seen
    /// here was left by a pass that never finished.
    async fn clear_stale_in_progress(&self) {
        match self.store.get_sync_status().await {
            Ok(status) if status.in_progress => {
                tracing::info!("clearing in-progress flag left by an interrupted pass");
                if let Err(e) = self.store.set_sync_status(SyncStatusUpdate::in_progress(false)).await {
                    tracing::warn!(error = %e, "failed to clear in-progress flag");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "failed to read sync status"),
        }
    }

    async fn replay_pass(&self) -> Result<ReplayOutcome, SyncError> {
        let mut report = SyncReport::default();

        let mut pending = Vec::new();
        for op in self.store.list_queued(None).await? {
            match op.status {
                QueueStatus::Failed => {
                    self.store.remove_queued(&op.id).await?;
                    report.purged += 1;
                }
                // applied before a crash, removal never happened
                QueueStatus::Completed => self.store.remove_queued(&op.id).await?,
                // interrupted attempt from a previous process
                QueueStatus::Processing => {
                    self.store
                        .update_queued(&op.id, QueuedUpdate::status(QueueStatus::Pending))
                        .await?;
                    pending.push(op);
                }
                QueueStatus::Pending => pending.push(op),
            }
        }

        if pending.is_empty() {
            if report.purged > 0 {
                self.monitor.clear_sync_error();
            }
            tracing::debug!(purged = report.purged, "queue empty; nothing to replay");
            return Ok(ReplayOutcome::Completed(report));
        }

        tracing::info!(pending = pending.len(), "replay pass started");
        self.monitor.set_syncing(true);
        if let Err(e) = self.store.set_sync_status(SyncStatusUpdate::in_progress(true)).await {
            tracing::warn!(error = %e, "failed to set in-progress flag");
        }
        self.refresh_indicator().await;

        for op in pending {
            if self.cancel_requested.load(Ordering::SeqCst) {
                tracing::info!("replay cancelled");
                report.interrupted = true;
                break;
            }
            if !self.monitor.is_online() {
                tracing::info!("connectivity lost; replay stopped");
                report.interrupted = true;
                break;
            }

            report.attempted += 1;
            self.replay_one(&op, &mut report).await?;
        }

        let failed_remaining = match self.store.list_queued(Some(QueueStatus::Failed)).await {
            Ok(failed) => failed.len(),
            Err(e) => {
                tracing::error!(error = %e, "could not read failed entries after pass");
                report.failed
            }
        };

        if failed_remaining > 0 {
            self.monitor
                .record_sync_error(format!("{failed_remaining} operation(s) failed to sync"));
        } else if !report.interrupted {
            let now = Utc::now();
            if let Err(e) = self.store.set_sync_status(SyncStatusUpdate::synced_at(now)).await {
                tracing::warn!(error = %e, "failed to record last sync time");
            }
            self.monitor.record_sync_success(now);
        }

        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            retried = report.retried,
            abandoned = report.abandoned,
            failed = report.failed,
            purged = report.purged,
            interrupted = report.interrupted,
            "replay pass finished"
        );
        broadcast_event(self.indicator.events(), SyncEvent::replay_finished(report.clone()));
        Ok(ReplayOutcome::Completed(report))
    }

    async fn replay_one(&self, op: &QueuedOperation, report: &mut SyncReport) -> Result<(), SyncError> {
        self.store
            .update_queued(&op.id, QueuedUpdate::processing(Utc::now()))
            .await?;

        match self.call_remote(&op.mutation).await {
            Ok(representation) => {
                self.store
                    .update_queued(&op.id, QueuedUpdate::status(QueueStatus::Completed))
                    .await?;
                self.store.remove_queued(&op.id).await?;
                self.write_through(&op.mutation, representation).await;
                report.succeeded += 1;
                tracing::debug!(id = %op.id, table = %op.table(), "queued operation applied");
            }
            Err(err) => match self.policy.classify(op.retry_count, &err) {
                FailureDisposition::Abandon => {
                    self.store.remove_queued(&op.id).await?;
                    report.abandoned += 1;
                    tracing::warn!(
                        id = %op.id,
                        operation = %op.operation(),
                        table = %op.table(),
                        error = %err,
                        "non-recoverable failure; operation abandoned"
                    );
                }
                FailureDisposition::Retry { retry_count } => {
                    self.store
                        .update_queued(
                            &op.id,
                            QueuedUpdate::status(QueueStatus::Pending)
                                .with_retry_count(retry_count)
                                .with_error(err.to_string()),
                        )
                        .await?;
                    report.retried += 1;
                    tracing::debug!(id = %op.id, retry_count, error = %err, "queued operation will be retried");
                }
                FailureDisposition::Fail { retry_count } => {
                    self.store
                        .update_queued(
                            &op.id,
                            QueuedUpdate::status(QueueStatus::Failed)
                                .with_retry_count(retry_count)
                                .with_error(err.to_string()),
                        )
                        .await?;
                    report.failed += 1;
                    tracing::warn!(id = %op.id, retry_count, error = %err, "queued operation failed permanently");
                }
            },
        }
        Ok(())
    }

    /// One remote write under the configured deadline
    async fn call_remote(&self, mutation: &Mutation) -> Result<Option<Value>, RemoteError> {
        match tokio::time::timeout(self.config.request_timeout, self.remote.apply(mutation)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::timeout(format!(
                "no response within {:?}",
                self.config.request_timeout
            ))),
        }
    }

    /// Mirror a successful write into the cache, best-effort
    async fn write_through(&self, mutation: &Mutation, representation: Option<Value>) {
        let collection = mutation.collection();
        let result = match mutation.operation() {
            OperationKind::Delete => self
                .store
                .remove_record(collection, mutation.record_id())
                .await
                .map(|_| ()),
            OperationKind::Create | OperationKind::Update => {
                let payload = match (representation, mutation.operation()) {
                    (Some(payload), _) => payload,
                    (None, OperationKind::Create) => match mutation.payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!(error = %e, "could not serialize created record for cache");
                            return;
                        }
                    },
                    // a bare patch is not a full record; the next fetch refreshes it
                    (None, _) => return,
                };
                let id = payload
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or(mutation.record_id())
                    .to_string();
                let record = CachedRecord::new(collection, id, payload, Utc::now());
                self.store.put_records(collection, &[record]).await
            }
        };

        if let Err(e) = result {
            tracing::warn!(table = %collection, error = %e, "cache write-through failed");
        }
    }

    /// Replay whenever connectivity comes back
    ///
    /// Waits `settle_delay` after each offline→online transition, re-checks
    /// connectivity, then replays if auto-sync is enabled. Also keeps the sync
    /// indicator current on every connectivity change. Runs until aborted.
    pub fn spawn_auto_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let mut rx = self.monitor.subscribe();
        let mut was_online = rx.borrow_and_update().is_online;

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = rx.borrow_and_update().is_online;
                if online == was_online {
                    continue;
                }
                was_online = online;
                coordinator.refresh_indicator().await;
                if !online {
                    continue;
                }

                tokio::time::sleep(coordinator.config.settle_delay).await;
                if !coordinator.monitor.is_online() {
                    tracing::debug!("connection dropped during settle delay");
                    continue;
                }
                if !coordinator.auto_sync_enabled().await {
                    tracing::debug!("auto-sync disabled; not replaying on reconnect");
                    continue;
                }

                tracing::info!("reconnected; starting replay");
                if let Err(e) = coordinator.process_queue().await {
                    tracing::error!(error = %e, "automatic replay failed");
                }
            }
        })
    }

    /// Config switch and stored preference combined
    ///
    /// An unreadable preference falls back to enabled.
    pub async fn auto_sync_enabled(&self) -> bool {
        if !self.config.auto_sync {
            return false;
        }
        match self.store.get_preferences().await {
            Ok(preferences) => preferences.auto_sync,
            Err(e) => {
                tracing::warn!(error = %e, "could not read auto-sync preference");
                Preferences::default().auto_sync
            }
        }
    }

    pub async fn set_auto_sync(&self, enabled: bool) -> Result<(), SyncError> {
        self.store
            .set_preferences(Preferences { auto_sync: enabled })
            .await?;
        tracing::info!(enabled, "auto-sync preference updated");
        Ok(())
    }

    /// Evict expired cache entries and purge `failed` queue entries
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport, SyncError> {
        let evicted = self.store.evict_expired(Utc::now()).await?;

        let mut purged = 0;
        for op in self.store.list_queued(Some(QueueStatus::Failed)).await? {
            self.store.remove_queued(&op.id).await?;
            purged += 1;
        }

        tracing::info!(evicted, purged, "maintenance pass finished");
        self.refresh_indicator().await;
        Ok(MaintenanceReport { evicted, purged })
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, SyncError> {
        let operations = self.store.list_queued(None).await?;
        Ok(QueueStats::from_operations(&operations))
    }

    /// Outstanding entries, or `None` when the store cannot be read
    pub async fn pending_count(&self) -> Option<usize> {
        match self.store.list_queued(None).await {
            Ok(operations) => Some(QueueStats::from_operations(&operations).outstanding()),
            Err(e) => {
                tracing::warn!(error = %e, "queue length unknown");
                None
            }
        }
    }

    /// Recompute and broadcast the sync indicator
    pub async fn refresh_indicator(&self) -> SyncIndicator {
        let pending = self.pending_count().await;
        self.indicator.update(&self.monitor.snapshot(), pending)
    }
}
