//! eventsync - Offline-First Sync Engine
//!
//! eventsync keeps an event-discovery client usable while disconnected. Reads
//! are served from a local cache first and refreshed in the background;
//! writes made offline land in a durable queue that is replayed, in order,
//! once connectivity returns.
//!
//! # Module Structure
//!
//! - **`shared`** - Types shared by every layer
//!   - Collections, typed records and the `Mutation` union
//!   - Sync events broadcast to the UI
//!   - Error and configuration types
//!
//! - **`client`** - The on-device engine
//!   - `local_db`: persistent store (SQLite via sqlx, or in memory)
//!   - `sync`: network monitor and sync indicator
//!   - `offline`: mutation queue coordinator
//!   - `data_source`: cache-first reads
//!   - `remote`: the remote API seam and its HTTP adapter
//!
//! # Usage
//!
//! ```rust,no_run
//! use eventsync::client::{
//!     CacheFirstSource, Config, FetchOptions, HttpRemote, LocalDatabase, NetworkMonitor, SyncCoordinator,
//! };
//! use eventsync::shared::EventRecord;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let store = Arc::new(LocalDatabase::open(config.db_path()).await?);
//! let remote = Arc::new(HttpRemote::new(&config)?);
//! let monitor = NetworkMonitor::new();
//!
//! let coordinator = Arc::new(SyncCoordinator::new(
//!     store.clone(),
//!     remote.clone(),
//!     monitor.clone(),
//!     config.sync().clone(),
//! ));
//! let _auto_sync = coordinator.spawn_auto_sync();
//!
//! let events = CacheFirstSource::<EventRecord>::new(
//!     store,
//!     remote,
//!     monitor,
//!     config.sync().clone(),
//!     coordinator.events(),
//! );
//! let state = events.fetch(FetchOptions::default().category("music")).await;
//! println!("{} events", state.records.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! Shared state lives in `watch` and `broadcast` channels and atomics on the
//! coordinator and data source instances; every component is `Send + Sync`
//! and can be wrapped in `Arc`.
//!
//! # Error Handling
//!
//! - `shared::SharedError` for invalid domain payloads
//! - `client::StoreError` for storage-engine failures
//! - `client::RemoteError` with a typed `RemoteErrorKind`
//! - `client::SyncError` aggregating the above at the public API

/// Shared types and data structures
pub mod shared;

/// On-device sync engine
pub mod client;
