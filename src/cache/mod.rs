//! Versioned cache generations for offline support.
//!
//! This module provides the persistent side of the offline worker:
//! - Named cache generations mapping a request key to a response snapshot
//! - A SQLite backend shared by the proxy and the CLI
//! - A per-generation handle with best-effort writes and miss-on-error reads

mod generation;
mod key;
mod storage;
mod traits;

pub use generation::Generation;
pub use storage::{CacheStorage, CachedResponse, SqliteStorage};
pub use traits::{CacheResult, CacheSource};
