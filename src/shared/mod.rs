//! Shared Module
//!
//! Types shared by every layer of the sync engine: the domain records and
//! their typed mutations, the events emitted to the UI, configuration and the
//! payload-level error type.

/// Domain records and typed mutations
pub mod records;

/// Events emitted to the UI layer
pub mod event;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

pub use config::{AppConfig, AppConfigBuilder, ConfigError};
pub use error::SharedError;
pub use event::{SyncEvent, SyncEventBroadcast, SyncEventType, SyncIndicator, SyncReport};
pub use records::{
    Collection, EventPatch, EventRecord, Mutation, OperationKind, Record, RecordFilter, RecordRef, UserPatch,
    UserRecord,
};
