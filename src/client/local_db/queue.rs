//! # Queue and Sync Metadata Operations
//!
//! The queue region, the sync-status singleton and the small key/value
//! metadata table holding user preferences.
//!
//! Entries are ordered by `seq`, an autoincrement column assigned at insert
//! time, so creation order survives identical `created_at` timestamps.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{from_millis, to_millis, LocalDatabase, Result, StoreError, SyncStatus, SyncStatusUpdate};
use crate::client::offline::queue::{QueueStatus, QueuedOperation, QueuedUpdate};
use crate::shared::records::Mutation;

pub(crate) const AUTO_SYNC_KEY: &str = "auto_sync";

impl LocalDatabase {
    /// Append a mutation to the offline queue as `pending`
    pub async fn add_to_offline_queue(&self, mutation: &Mutation) -> Result<String> {
        let op = QueuedOperation::new(mutation.clone());
        let data = serde_json::to_string(&op.mutation)?;

        sqlx::query(
            "INSERT INTO offline_queue (id, operation, table_name, record_id, data, status, retry_count, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&op.id)
        .bind(op.operation().as_str())
        .bind(op.table().as_str())
        .bind(op.mutation.record_id())
        .bind(data)
        .bind(QueueStatus::Pending.as_str())
        .bind(to_millis(op.created_at))
        .execute(&self.pool)
        .await?;

        Ok(op.id)
    }

    /// Queue entries in creation order
    pub async fn get_queued_operations(&self, status: Option<QueueStatus>) -> Result<Vec<QueuedOperation>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT id, data, status, retry_count, error, created_at, last_attempt
                     FROM offline_queue
                     WHERE status = ?
                     ORDER BY seq ASC",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, data, status, retry_count, error, created_at, last_attempt
                     FROM offline_queue
                     ORDER BY seq ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_operation).collect()
    }

    /// Merge the given fields into one entry
    pub async fn update_operation(&self, id: &str, update: &QueuedUpdate) -> Result<()> {
        let (set_error, error) = match &update.error {
            Some(error) => (true, error.clone()),
            None => (false, None),
        };

        let result = sqlx::query(
            "UPDATE offline_queue SET
                status = COALESCE(?, status),
                retry_count = COALESCE(?, retry_count),
                error = CASE WHEN ? THEN ? ELSE error END,
                last_attempt = COALESCE(?, last_attempt)
             WHERE id = ?",
        )
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.retry_count.map(i64::from))
        .bind(set_error)
        .bind(error)
        .bind(update.last_attempt.map(to_millis))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Permanently delete one entry
    pub async fn delete_operation(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM offline_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn read_sync_status(&self) -> Result<SyncStatus> {
        let row = sqlx::query("SELECT last_sync, in_progress FROM sync_status WHERE singleton = 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let last_sync: Option<i64> = row.try_get("last_sync")?;
                Ok(SyncStatus {
                    last_sync: last_sync.map(from_millis),
                    in_progress: row.try_get("in_progress")?,
                })
            }
            None => Ok(SyncStatus::default()),
        }
    }

    pub async fn write_sync_status(&self, update: &SyncStatusUpdate) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_status (singleton, last_sync, in_progress)
             VALUES (1, ?, COALESCE(?, 0))
             ON CONFLICT (singleton) DO UPDATE SET
                last_sync = COALESCE(excluded.last_sync, sync_status.last_sync),
                in_progress = COALESCE(?, sync_status.in_progress)",
        )
        .bind(update.last_sync.map(to_millis))
        .bind(update.in_progress)
        .bind(update.in_progress)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Set sync metadata
    pub async fn set_sync_metadata(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO sync_metadata (key, value, updated_at)
             VALUES (?, ?, ?)",
        )
        .bind(key)
        .bind(value)
        .bind(to_millis(chrono::Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get sync metadata
    pub async fn get_sync_metadata(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM sync_metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }
}

fn row_to_operation(row: &SqliteRow) -> Result<QueuedOperation> {
    let data: String = row.try_get("data")?;
    let status: String = row.try_get("status")?;
    let retry_count: i64 = row.try_get("retry_count")?;
    let last_attempt: Option<i64> = row.try_get("last_attempt")?;

    Ok(QueuedOperation {
        id: row.try_get("id")?,
        mutation: serde_json::from_str(&data)?,
        status: status.parse()?,
        retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
        error: row.try_get("error")?,
        created_at: from_millis(row.try_get("created_at")?),
        last_attempt: last_attempt.map(from_millis),
    })
}
