//! Cache-First Data Source
//!
//! The read path. Every fetch first emits whatever the local store holds,
//! then (when the network allows) asks the remote API for fresh data and
//! replaces the visible state with it. The fresh page is written back to the
//! cache afterwards, off the critical path.
//!
//! State is published through a `tokio::sync::watch` channel so a view can
//! await changes instead of polling. Each fetch takes a new generation
//! number; a response whose generation is no longer current is dropped
//! without touching state or cache, so a slow earlier request can never
//! overwrite a newer one.

use chrono::Utc;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::client::local_db::{CachedRecord, Store, SyncStatusUpdate};
use crate::client::remote::{FetchPage, FetchQuery, RemoteApi, RemoteError};
use crate::client::sync::{ConnectionQuality, NetworkMonitor, SyncConfig};
use crate::shared::event::{broadcast_event, SyncEvent, SyncEventBroadcast};
use crate::shared::records::{Record, RecordFilter};

/// Parameters of one read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Page size; the configured default when `None`
    pub limit: Option<u32>,
    pub offset: u32,
    /// Field projection passed to the remote
    pub fields: Option<Vec<String>>,
    pub category: Option<String>,
    pub upcoming_only: bool,
    /// Skip the cache emission and ignore quality throttling
    pub force_refresh: bool,
}

impl FetchOptions {
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn upcoming_only(mut self) -> Self {
        self.upcoming_only = true;
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn forced(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    fn filter(&self) -> RecordFilter {
        RecordFilter {
            category: self.category.clone(),
            upcoming_only: self.upcoming_only,
            now: Some(Utc::now()),
        }
    }
}

/// Observable state of one subscription
#[derive(Debug, Clone, PartialEq)]
pub struct FetchState<R> {
    pub records: Vec<R>,
    /// More pages are available remotely
    pub has_more: bool,
    pub total_count: Option<u64>,
    /// Error of the last initial fetch that had nothing to fall back on
    pub error: Option<String>,
    pub is_loading: bool,
    /// Records came from the local cache, not the network
    pub from_cache: bool,
}

impl<R> Default for FetchState<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            has_more: false,
            total_count: None,
            error: None,
            is_loading: false,
            from_cache: false,
        }
    }
}

/// Options of the last fetch and where the next page starts
#[derive(Debug, Clone, Default)]
struct Cursor {
    options: FetchOptions,
    next_offset: u32,
}

/// Cache-first reads for one collection and one logical subscription
pub struct CacheFirstSource<R: Record> {
    store: Arc<dyn Store>,
    remote: Arc<dyn RemoteApi>,
    monitor: NetworkMonitor,
    config: SyncConfig,
    events: SyncEventBroadcast,
    state: watch::Sender<FetchState<R>>,
    generation: AtomicU64,
    /// Newest generation written to the cache; held across each write
    cache_writes: Arc<tokio::sync::Mutex<u64>>,
    cursor: Mutex<Cursor>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> CacheFirstSource<R> {
    pub fn new(
        store: Arc<dyn Store>,
        remote: Arc<dyn RemoteApi>,
        monitor: NetworkMonitor,
        config: SyncConfig,
        events: SyncEventBroadcast,
    ) -> Self {
        let (state, _rx) = watch::channel(FetchState::default());
        Self {
            store,
            remote,
            monitor,
            config,
            events,
            state,
            generation: AtomicU64::new(0),
            cache_writes: Arc::new(tokio::sync::Mutex::new(0)),
            cursor: Mutex::new(Cursor::default()),
            _record: PhantomData,
        }
    }

    pub fn snapshot(&self) -> FetchState<R> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState<R>> {
        self.state.subscribe()
    }

    /// Read with cache-first semantics and return the resulting state
    ///
    /// Supersedes any fetch still in flight on this source.
    pub async fn fetch(&self, options: FetchOptions) -> FetchState<R> {
        let generation = self.begin();
        self.set_cursor(Cursor {
            next_offset: options.offset,
            options: options.clone(),
        });

        let continuation = options.offset > 0;
        if !options.force_refresh && !continuation {
            let cached = self.read_cache(&options).await;
            let emitted = self.state.send_if_modified(|state| {
                if !self.is_current(generation) {
                    return false;
                }
                state.records = cached;
                state.from_cache = true;
                state.has_more = false;
                state.total_count = None;
                state.error = None;
                state.is_loading = true;
                true
            });
            if !emitted {
                return self.snapshot();
            }
        }

        if !self.network_allowed(options.force_refresh) {
            self.finish_loading(generation);
            return self.snapshot();
        }

        self.load_page(generation, &options, continuation).await
    }

    /// Fetch the next page and append it
    pub async fn load_more(&self) -> FetchState<R> {
        let cursor = self.get_cursor();
        if !self.state.borrow().has_more || !self.monitor.is_online() {
            return self.snapshot();
        }

        let generation = self.begin();
        let options = FetchOptions {
            offset: cursor.next_offset,
            ..cursor.options
        };
        self.load_page(generation, &options, true).await
    }

    /// Pull-to-refresh: the first page again, ignoring quality throttling
    pub async fn refresh(&self) -> FetchState<R> {
        let cursor = self.get_cursor();
        let options = FetchOptions {
            offset: 0,
            force_refresh: true,
            ..cursor.options
        };
        self.fetch(options).await
    }

    /// Drop whatever is in flight; its result will not be applied
    pub fn cancel(&self) {
        let generation = self.begin();
        self.finish_loading(generation);
    }

    fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn get_cursor(&self) -> Cursor {
        match self.cursor.lock() {
            Ok(cursor) => cursor.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_cursor(&self, cursor: Cursor) {
        match self.cursor.lock() {
            Ok(mut guard) => *guard = cursor,
            Err(poisoned) => *poisoned.into_inner() = cursor,
        }
    }

    fn finish_loading(&self, generation: u64) {
        self.state.send_if_modified(|state| {
            if !self.is_current(generation) || !state.is_loading {
                return false;
            }
            state.is_loading = false;
            true
        });
    }

    fn network_allowed(&self, forced: bool) -> bool {
        let network = self.monitor.snapshot();
        if !network.is_online {
            return false;
        }
        forced || !(self.config.skip_refresh_on_poor && network.connection_quality == ConnectionQuality::Poor)
    }

    /// Cached records passing the local filter; empty if the store fails
    async fn read_cache(&self, options: &FetchOptions) -> Vec<R> {
        let payloads = match self.store.get_records(R::COLLECTION).await {
            Ok(payloads) => payloads,
            Err(e) => {
                tracing::warn!(collection = %R::COLLECTION, error = %e, "cache unavailable; serving nothing");
                return Vec::new();
            }
        };

        let filter = options.filter();
        decode_records::<R>(&payloads)
            .into_iter()
            .filter(|record| record.matches(&filter))
            .collect()
    }

    async fn request(&self, query: &FetchQuery) -> Result<FetchPage, RemoteError> {
        match tokio::time::timeout(self.config.request_timeout, self.remote.fetch(R::COLLECTION, query)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::timeout(format!(
                "no response within {:?}",
                self.config.request_timeout
            ))),
        }
    }

    async fn load_page(&self, generation: u64, options: &FetchOptions, append: bool) -> FetchState<R> {
        self.state.send_if_modified(|state| {
            if !self.is_current(generation) || state.is_loading {
                return false;
            }
            state.is_loading = true;
            true
        });

        let limit = options.limit.unwrap_or(self.config.page_size);
        let query = FetchQuery {
            limit: Some(limit),
            offset: options.offset,
            fields: options.fields.clone(),
            category: options.category.clone(),
            upcoming_only: options.upcoming_only,
        };

        match self.request(&query).await {
            Ok(page) => {
                let records = decode_records::<R>(&page.records);
                let received = u32::try_from(page.records.len()).unwrap_or(u32::MAX);
                let has_more = match page.total_count {
                    Some(total) => u64::from(options.offset) + u64::from(received) < total,
                    None => received >= limit,
                };

                let applied = self.state.send_if_modified(|state| {
                    if !self.is_current(generation) {
                        return false;
                    }
                    if append {
                        state.records.extend(records);
                    } else {
                        state.records = records;
                    }
                    state.has_more = has_more;
                    state.total_count = page.total_count;
                    state.error = None;
                    state.is_loading = false;
                    state.from_cache = false;
                    true
                });

                if applied {
                    self.set_cursor(Cursor {
                        options: options.clone(),
                        next_offset: options.offset.saturating_add(received),
                    });
                    self.persist(generation, page.records);
                } else {
                    tracing::debug!(collection = %R::COLLECTION, "superseded fetch result dropped");
                }
            }
            Err(e) => {
                tracing::warn!(
                    collection = %R::COLLECTION,
                    offset = options.offset,
                    error = %e,
                    "remote fetch failed; keeping current records"
                );
                self.state.send_if_modified(|state| {
                    if !self.is_current(generation) {
                        return false;
                    }
                    state.is_loading = false;
                    if !append && state.records.is_empty() {
                        state.error = Some(e.to_string());
                    }
                    true
                });
            }
        }

        self.snapshot()
    }

    /// Write a fresh page to the cache in the background
    ///
    /// Writes run one at a time, and a page from an older generation that
    /// reaches the lock after a newer one is dropped, so a late write can
    /// never put older data over newer rows.
    fn persist(&self, generation: u64, payloads: Vec<Value>) {
        let now = Utc::now();
        let rows: Vec<CachedRecord> = payloads
            .into_iter()
            .filter_map(|payload| {
                let id = payload.get("id").and_then(Value::as_str)?.to_string();
                Some(CachedRecord::new(R::COLLECTION, id, payload, now))
            })
            .collect();
        if rows.is_empty() || !self.is_current(generation) {
            return;
        }

        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let cache_writes = Arc::clone(&self.cache_writes);
        tokio::spawn(async move {
            let collection = R::COLLECTION;
            let mut written = cache_writes.lock().await;
            if generation < *written {
                tracing::debug!(%collection, generation, newest = *written, "dropping stale cache write");
                return;
            }
            *written = generation;
            if let Err(e) = store.put_records(collection, &rows).await {
                tracing::warn!(%collection, error = %e, "background cache write failed");
                return;
            }
            if let Err(e) = store.set_sync_status(SyncStatusUpdate::synced_at(now)).await {
                tracing::warn!(error = %e, "failed to record refresh time");
            }
            tracing::debug!(%collection, records = rows.len(), "cache refreshed");
            broadcast_event(&events, SyncEvent::cache_refreshed(collection, rows.len()));
        });
    }
}

/// Decode payloads, skipping (and logging) any that do not fit the record type
fn decode_records<R: Record>(payloads: &[Value]) -> Vec<R> {
    payloads
        .iter()
        .filter_map(|payload| match serde_json::from_value::<R>(payload.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(collection = %R::COLLECTION, error = %e, "skipping undecodable record");
                None
            }
        })
        .collect()
}
