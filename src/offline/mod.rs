//! Durable store behind the outbox and offline reads.
//!
//! Holds four collections in one SQLite database:
//! - pending actions (the outbox), replayed by [`crate::sync`]
//! - actions discarded after running out of retries
//! - offline snapshots of user-scoped collections
//! - query results with a read-time freshness window
//!
//! The collections are independent; nothing links a pending action to a
//! snapshot.

mod outbox;
mod queries;
mod schema;
mod snapshots;

pub use outbox::{DiscardedAction, PendingAction};
pub use snapshots::{Snapshot, SnapshotCategory};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Record counts per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
  pub snapshots: usize,
  pub pending_actions: usize,
  pub discarded_actions: usize,
  pub cached_queries: usize,
}

/// SQLite-backed offline store.
pub struct OfflineStore {
  conn: Mutex<Connection>,
  /// How long a cached query result stays usable
  query_freshness: Duration,
}

impl OfflineStore {
  /// Open or create the store at `path`. Safe to call on an existing store.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create offline store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open offline store at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory offline store: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
      query_freshness: Duration::hours(24),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Set the freshness window for cached query results.
  pub fn with_query_freshness(mut self, freshness: Duration) -> Self {
    self.query_freshness = freshness;
    self
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run offline store migrations: {}", e))?;
    Ok(())
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Count records in every collection.
  pub fn stats(&self) -> Result<StoreStats> {
    let conn = self.conn()?;
    let count = |table: &str| -> Result<usize> {
      conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
          row.get::<_, i64>(0)
        })
        .map(|n| n as usize)
        .map_err(|e| eyre!("Failed to count {}: {}", table, e))
    };

    Ok(StoreStats {
      snapshots: count("offline_data")?,
      pending_actions: count("pending_actions")?,
      discarded_actions: count("discarded_actions")?,
      cached_queries: count("query_cache")?,
    })
  }

  /// Remove everything, e.g. when the user signs out.
  pub fn clear(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(
        "DELETE FROM offline_data;
         DELETE FROM pending_actions;
         DELETE FROM discarded_actions;
         DELETE FROM query_cache;",
      )
      .map_err(|e| eyre!("Failed to clear offline store: {}", e))?;
    Ok(())
  }
}

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that text
/// comparison orders them correctly.
fn timestamp(at: DateTime<Utc>) -> String {
  at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse timestamp '{}': {}", s, e))
}

fn parse_payload(s: &str) -> Result<serde_json::Value> {
  serde_json::from_str(s).map_err(|e| eyre!("Failed to parse stored payload: {}", e))
}
