//! Offline-First Client Module
//!
//! Everything that runs on the device:
//!
//! - **`config`** - Configuration (server URL, token, database path, sync tunables)
//! - **`local_db`** - Persistent store: cached records, mutation queue, sync status
//! - **`remote`** - Remote API seam and its HTTP adapter
//! - **`sync`** - Network monitor, sync indicator, `SyncConfig`
//! - **`offline`** - Mutation queue coordinator (write path and replay)
//! - **`data_source`** - Cache-first read path
//!
//! # Module Structure
//!
//! ```text
//! client/
//! ├── mod.rs          - Module exports and documentation
//! ├── config.rs       - Configuration management
//! ├── remote.rs       - RemoteApi trait, HttpRemote
//! ├── data_source.rs  - CacheFirstSource
//! ├── local_db/       - Store trait, SQLite and in-memory adapters
//! ├── offline/        - SyncCoordinator, queue entries, retry policy
//! └── sync/           - NetworkMonitor, sync indicator
//! ```

pub mod config;
pub mod data_source;
pub mod local_db;
pub mod offline;
pub mod remote;
pub mod sync;

// Re-export commonly used types
pub use config::Config;
pub use data_source::{CacheFirstSource, FetchOptions, FetchState};
pub use local_db::{LocalDatabase, MemoryStore, Store, StoreError};
pub use offline::{ReplayOutcome, SyncCoordinator, WriteOutcome};
pub use remote::{HttpRemote, RemoteApi, RemoteError, RemoteErrorKind};
pub use sync::{NetworkMonitor, SyncConfig, SyncError};
