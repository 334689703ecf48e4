//! Database Schema Definitions
//!
//! Schema version constants and the statements each migration applies on
//! top of `schema.sql`.

/// Current database schema version
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// Schema migration versions
pub const MIGRATION_VERSIONS: &[i64] = &[1, 2];

/// Check if database needs migration
pub fn needs_migration(current_version: i64) -> bool {
    current_version < CURRENT_SCHEMA_VERSION
}

/// Get pending migrations
pub fn get_pending_migrations(current_version: i64) -> Vec<i64> {
    MIGRATION_VERSIONS
        .iter()
        .filter(|&&v| v > current_version)
        .cloned()
        .collect()
}

/// Statements applied by one migration. Each must be idempotent.
pub fn migration_statements(version: i64) -> &'static [&'static str] {
    match version {
        // 1: base tables, created by schema.sql
        1 => &[],
        2 => &[
            "CREATE INDEX IF NOT EXISTS idx_cached_records_expiry ON cached_records (expires_at)",
            "CREATE INDEX IF NOT EXISTS idx_offline_queue_status ON offline_queue (status, seq)",
        ],
        _ => &[],
    }
}
