//! # Cached Record Operations
//!
//! The records region: one row per `(collection, id)`, holding the last known
//! good payload and its expiry horizon.
//!
//! A write for an id that is already cached replaces the payload outright.
//! Payloads are never merged, so a projected fetch (`fields=id,title`)
//! leaves only the projected fields behind.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;

use super::{from_millis, to_millis, CachedRecord, LocalDatabase, Result};
use crate::shared::records::Collection;

impl LocalDatabase {
    /// Payloads of every cached record in a collection, in first-cached order
    pub async fn cached_payloads(&self, collection: Collection) -> Result<Vec<Value>> {
        let rows = sqlx::query("SELECT payload FROM cached_records WHERE collection = ? ORDER BY rowid ASC")
            .bind(collection.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut payloads = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.try_get("payload")?;
            payloads.push(serde_json::from_str(&payload)?);
        }
        Ok(payloads)
    }

    /// Full cached rows for a collection, including their timestamps
    pub async fn cached_records(&self, collection: Collection) -> Result<Vec<CachedRecord>> {
        let rows = sqlx::query(
            "SELECT id, payload, cached_at, expires_at
             FROM cached_records
             WHERE collection = ?
             ORDER BY rowid ASC",
        )
        .bind(collection.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.try_get("payload")?;
            records.push(CachedRecord {
                id: row.try_get("id")?,
                payload: serde_json::from_str(&payload)?,
                cached_at: from_millis(row.try_get("cached_at")?),
                expires_at: from_millis(row.try_get("expires_at")?),
            });
        }
        Ok(records)
    }

    /// Replace-or-insert a batch of records
    ///
    /// Conflicting ids keep their row (and therefore their position) but get
    /// the new payload and timestamps.
    pub async fn upsert_records(&self, collection: Collection, records: &[CachedRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            let payload = serde_json::to_string(&record.payload)?;
            sqlx::query(
                "INSERT INTO cached_records (collection, id, payload, cached_at, expires_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (collection, id) DO UPDATE SET
                    payload = excluded.payload,
                    cached_at = excluded.cached_at,
                    expires_at = excluded.expires_at",
            )
            .bind(collection.as_str())
            .bind(&record.id)
            .bind(payload)
            .bind(to_millis(record.cached_at))
            .bind(to_millis(record.expires_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_record(&self, collection: Collection, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cached_records WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Maintenance: drop records past their horizon
    pub async fn delete_expired_records(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cached_records WHERE expires_at <= ?")
            .bind(to_millis(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
