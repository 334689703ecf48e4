//! # Local Database Module
//!
//! Durable, crash-safe on-device storage for the sync engine. The store holds
//! three regions:
//!
//! - **Records**: cached domain records per collection, with an expiry horizon
//! - **Queue**: the ordered, durable queue of pending writes
//! - **Sync status**: a singleton `{last_sync, in_progress}` record, plus
//!   small metadata values such as the auto-sync preference
//!
//! The engine only talks to the [`Store`] trait. Two adapters ship with the
//! crate:
//!
//! - [`LocalDatabase`]: SQLite through `sqlx`, used on device
//! - [`MemoryStore`]: process-local, used in tests and ephemeral sessions
//!
//! ## Usage
//!
//! ```rust,no_run
//! use eventsync::client::local_db::{LocalDatabase, Store};
//! use eventsync::shared::Collection;
//!
//! # async fn example() -> Result<(), eventsync::client::local_db::StoreError> {
//! let db = LocalDatabase::open_default().await?;
//! let events = db.get_records(Collection::Events).await?;
//! println!("{} cached events", events.len());
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod queue;
pub mod records;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::client::offline::queue::{QueueStatus, QueuedOperation, QueuedUpdate};
use crate::shared::error::SharedError;
use crate::shared::records::{Collection, Mutation};

pub use memory::MemoryStore;

/// Result type for local store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage-engine failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(#[from] SharedError),

    #[error("queued operation not found: {id}")]
    NotFound { id: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// A domain record as last known good
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    pub id: String,
    pub payload: Value,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedRecord {
    /// Wrap a payload, stamping it with the collection's expiry horizon
    pub fn new(collection: Collection, id: impl Into<String>, payload: Value, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            payload,
            cached_at: now,
            expires_at: now + collection.cache_ttl(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Persisted sync status singleton
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub last_sync: Option<DateTime<Utc>>,
    pub in_progress: bool,
}

/// Partial update of the sync status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatusUpdate {
    pub last_sync: Option<DateTime<Utc>>,
    pub in_progress: Option<bool>,
}

impl SyncStatusUpdate {
    pub fn in_progress(in_progress: bool) -> Self {
        Self {
            in_progress: Some(in_progress),
            ..Default::default()
        }
    }

    pub fn synced_at(at: DateTime<Utc>) -> Self {
        Self {
            last_sync: Some(at),
            ..Default::default()
        }
    }
}

/// User preferences consumed by the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Replay the queue automatically on reconnect
    pub auto_sync: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self { auto_sync: true }
    }
}

/// Durable storage for cached records, the mutation queue and sync status
///
/// Every operation is atomic at the level of one record or one queue entry.
/// Implementations report engine failures and never treat "not found" as an
/// error on reads.
#[async_trait]
pub trait Store: Send + Sync {
    /// Payloads of every cached record in a collection
    async fn get_records(&self, collection: Collection) -> Result<Vec<Value>>;

    /// Replace-or-insert by id
    async fn put_records(&self, collection: Collection, records: &[CachedRecord]) -> Result<()>;

    /// Drop one cached record, returning whether it existed
    async fn remove_record(&self, collection: Collection, id: &str) -> Result<bool>;

    /// Drop every cached record whose horizon has passed
    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Append a write to the queue as `pending`, returning its id
    async fn enqueue(&self, mutation: &Mutation) -> Result<String>;

    /// Queue entries in creation order, optionally filtered by status
    async fn list_queued(&self, status: Option<QueueStatus>) -> Result<Vec<QueuedOperation>>;

    /// Merge fields into one queue entry
    async fn update_queued(&self, id: &str, update: QueuedUpdate) -> Result<()>;

    /// Delete one queue entry. Callers only do this from a terminal state.
    async fn remove_queued(&self, id: &str) -> Result<()>;

    async fn get_sync_status(&self) -> Result<SyncStatus>;

    async fn set_sync_status(&self, update: SyncStatusUpdate) -> Result<()>;

    async fn get_preferences(&self) -> Result<Preferences>;

    async fn set_preferences(&self, preferences: Preferences) -> Result<()>;
}

/// Local database connection manager
///
/// Manages the SQLite connection pool and the schema. The trait impl lives
/// here; the SQL for each region is in `records.rs` and `queue.rs`.
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    pool: SqlitePool,
}

impl LocalDatabase {
    /// Open or create the database at the platform data directory
    pub async fn open_default() -> Result<Self> {
        Self::open(Self::default_path()).await
    }

    /// Open or create the database file at `path`
    ///
    /// Uses WAL mode so reads from the UI never wait on a replay pass.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new().max_connections(4).connect_with(options).await?;

        let db = Self { pool };
        db.init_schema().await?;
        tracing::debug!(path = %path.display(), "local database opened");
        Ok(db)
    }

    /// Open a private in-memory database
    ///
    /// The pool holds exactly one connection that never expires, since every
    /// SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Platform-specific path for the local database file
    pub fn default_path() -> PathBuf {
        let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        path.push("eventsync");
        path.push("local.db");
        path
    }

    /// Create all tables and run pending migrations
    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("schema.sql")).execute(&self.pool).await?;
        self.run_migrations().await?;
        Ok(())
    }

    /// Apply any migrations newer than the recorded schema version
    async fn run_migrations(&self) -> Result<()> {
        let current_version: (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await?;

        for version in schema::get_pending_migrations(current_version.0) {
            let mut tx = self.pool.begin().await?;
            for statement in schema::migration_statements(version) {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(Utc::now().timestamp_millis())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(version, "applied local schema migration");
        }

        Ok(())
    }

    /// Connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Basic statistics about the local database
    pub async fn get_stats(&self) -> Result<DatabaseStats> {
        let cached_records: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cached_records")
            .fetch_one(&self.pool)
            .await?;

        let pending_operations: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM offline_queue WHERE status IN ('pending', 'processing')")
                .fetch_one(&self.pool)
                .await?;

        let failed_operations: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM offline_queue WHERE status = 'failed'")
            .fetch_one(&self.pool)
            .await?;

        Ok(DatabaseStats {
            cached_records: cached_records.0 as u64,
            pending_operations: pending_operations.0 as u64,
            failed_operations: failed_operations.0 as u64,
        })
    }
}

#[async_trait]
impl Store for LocalDatabase {
    async fn get_records(&self, collection: Collection) -> Result<Vec<Value>> {
        self.cached_payloads(collection).await
    }

    async fn put_records(&self, collection: Collection, records: &[CachedRecord]) -> Result<()> {
        self.upsert_records(collection, records).await
    }

    async fn remove_record(&self, collection: Collection, id: &str) -> Result<bool> {
        self.delete_record(collection, id).await
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.delete_expired_records(now).await
    }

    async fn enqueue(&self, mutation: &Mutation) -> Result<String> {
        self.add_to_offline_queue(mutation).await
    }

    async fn list_queued(&self, status: Option<QueueStatus>) -> Result<Vec<QueuedOperation>> {
        self.get_queued_operations(status).await
    }

    async fn update_queued(&self, id: &str, update: QueuedUpdate) -> Result<()> {
        self.update_operation(id, &update).await
    }

    async fn remove_queued(&self, id: &str) -> Result<()> {
        self.delete_operation(id).await
    }

    async fn get_sync_status(&self) -> Result<SyncStatus> {
        self.read_sync_status().await
    }

    async fn set_sync_status(&self, update: SyncStatusUpdate) -> Result<()> {
        self.write_sync_status(&update).await
    }

    async fn get_preferences(&self) -> Result<Preferences> {
        let auto_sync = self
            .get_sync_metadata(queue::AUTO_SYNC_KEY)
            .await?
            .map(|value| value != "false")
            .unwrap_or(true);
        Ok(Preferences { auto_sync })
    }

    async fn set_preferences(&self, preferences: Preferences) -> Result<()> {
        let value = if preferences.auto_sync { "true" } else { "false" };
        self.set_sync_metadata(queue::AUTO_SYNC_KEY, value).await
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Cached records across all collections
    pub cached_records: u64,
    /// Queue entries still awaiting a remote call
    pub pending_operations: u64,
    /// Terminal queue entries awaiting purge
    pub failed_operations: u64,
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}
