//! Named, versioned response caches.
//!
//! Each cache is identified by `"{purpose}-{version}"`. Entries map a request
//! key to a stored response and are only inserted or overwritten; caches from
//! an older version are dropped whole on activation.
//!
//! Concurrent writes to the same key are last-writer-wins. Cached responses
//! are idempotent per URL, so no locking happens above the storage itself.

mod result;
mod storage;

pub use result::{CacheResult, CacheSource};
pub use storage::{CacheStorage, SqliteStorage};
