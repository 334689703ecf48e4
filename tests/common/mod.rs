//! Common test utilities and helpers
//!
//! This module provides shared utilities for all tests including:
//! - A scripted in-process remote API
//! - Coordinator and data source fixtures
//! - Custom assertion macros

pub mod assertions;
pub mod mock_remote;

// Re-export commonly used utilities
pub use fixtures::*;
pub use mock_remote::*;
