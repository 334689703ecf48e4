//! # In-Memory Store
//!
//! A [`Store`] that keeps every region in process memory. Nothing survives a
//! restart, which makes it the adapter of choice for tests and for sessions
//! that must not touch disk.
//!
//! The store can be switched to "unavailable" to reproduce storage-engine
//! failures (quota exceeded, engine gone) without a real database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{CachedRecord, Preferences, Result, Store, StoreError, SyncStatus, SyncStatusUpdate};
use crate::client::offline::queue::{QueueStatus, QueuedOperation, QueuedUpdate};
use crate::shared::records::{Collection, Mutation};

#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Cached records per collection, in first-cached order
    records: RwLock<HashMap<Collection, Vec<CachedRecord>>>,
    /// Queued operations in creation order
    operations: RwLock<VecDeque<QueuedOperation>>,
    status: RwLock<SyncStatus>,
    preferences: RwLock<Preferences>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }

    /// Full cached rows for a collection
    pub async fn cached_records(&self, collection: Collection) -> Result<Vec<CachedRecord>> {
        self.check_available()?;
        let records = self.records.read().await;
        Ok(records.get(&collection).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_records(&self, collection: Collection) -> Result<Vec<Value>> {
        self.check_available()?;
        let records = self.records.read().await;
        Ok(records
            .get(&collection)
            .map(|rows| rows.iter().map(|r| r.payload.clone()).collect())
            .unwrap_or_default())
    }

    async fn put_records(&self, collection: Collection, incoming: &[CachedRecord]) -> Result<()> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let rows = records.entry(collection).or_default();
        for record in incoming {
            match rows.iter_mut().find(|existing| existing.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => rows.push(record.clone()),
            }
        }
        Ok(())
    }

    async fn remove_record(&self, collection: Collection, id: &str) -> Result<bool> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let Some(rows) = records.get_mut(&collection) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|r| r.id != id);
        Ok(rows.len() != before)
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let mut evicted = 0;
        for rows in records.values_mut() {
            let before = rows.len();
            rows.retain(|r| !r.is_expired(now));
            evicted += (before - rows.len()) as u64;
        }
        Ok(evicted)
    }

    async fn enqueue(&self, mutation: &Mutation) -> Result<String> {
        self.check_available()?;
        let op = QueuedOperation::new(mutation.clone());
        let id = op.id.clone();
        self.operations.write().await.push_back(op);
        Ok(id)
    }

    async fn list_queued(&self, status: Option<QueueStatus>) -> Result<Vec<QueuedOperation>> {
        self.check_available()?;
        let operations = self.operations.read().await;
        Ok(operations
            .iter()
            .filter(|op| status.map_or(true, |s| op.status == s))
            .cloned()
            .collect())
    }

    async fn update_queued(&self, id: &str, update: QueuedUpdate) -> Result<()> {
        self.check_available()?;
        let mut operations = self.operations.write().await;
        match operations.iter_mut().find(|op| op.id == id) {
            Some(op) => {
                op.apply(&update);
                Ok(())
            }
            None => Err(StoreError::NotFound { id: id.to_string() }),
        }
    }

    async fn remove_queued(&self, id: &str) -> Result<()> {
        self.check_available()?;
        self.operations.write().await.retain(|op| op.id != id);
        Ok(())
    }

    async fn get_sync_status(&self) -> Result<SyncStatus> {
        self.check_available()?;
        Ok(self.status.read().await.clone())
    }

    async fn set_sync_status(&self, update: SyncStatusUpdate) -> Result<()> {
        self.check_available()?;
        let mut status = self.status.write().await;
        if let Some(last_sync) = update.last_sync {
            status.last_sync = Some(last_sync);
        }
        if let Some(in_progress) = update.in_progress {
            status.in_progress = in_progress;
        }
        Ok(())
    }

    async fn get_preferences(&self) -> Result<Preferences> {
        self.check_available()?;
        Ok(*self.preferences.read().await)
    }

    async fn set_preferences(&self, preferences: Preferences) -> Result<()> {
        self.check_available()?;
        *self.preferences.write().await = preferences;
        Ok(())
    }
}
