//! Query-result cache with a fixed freshness window checked on read.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{parse_payload, parse_timestamp, timestamp, OfflineStore};

/// Stable, fixed-length key for a query string.
fn query_key(query: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(query.trim().as_bytes());
  hex::encode(hasher.finalize())
}

impl OfflineStore {
  /// Store the result of a query, replacing any previous one.
  pub fn cache_query(&self, query: &str, payload: &Value) -> Result<()> {
    self.cache_query_at(query, payload, Utc::now())
  }

  fn cache_query_at(&self, query: &str, payload: &Value, at: DateTime<Utc>) -> Result<()> {
    let data =
      serde_json::to_string(payload).map_err(|e| eyre!("Failed to serialize query result: {}", e))?;

    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO query_cache (query_key, query, payload, cached_at)
         VALUES (?, ?, ?, ?)",
        params![query_key(query), query, data, timestamp(at)],
      )
      .map_err(|e| eyre!("Failed to cache query '{}': {}", query, e))?;

    Ok(())
  }

  /// The cached result for `query`, unless it is older than the freshness
  /// window. Stale rows are left in place for `purge_expired_queries`.
  pub fn cached_query(&self, query: &str) -> Result<Option<Value>> {
    let row: Option<(String, String)> = self
      .conn()?
      .query_row(
        "SELECT payload, cached_at FROM query_cache WHERE query_key = ?",
        params![query_key(query)],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to load cached query '{}': {}", query, e))?;

    let Some((payload, cached_at)) = row else {
      return Ok(None);
    };

    if Utc::now() - parse_timestamp(&cached_at)? > self.query_freshness {
      return Ok(None);
    }

    parse_payload(&payload).map(Some)
  }

  /// Delete query results older than the freshness window.
  pub fn purge_expired_queries(&self) -> Result<usize> {
    // A window reaching before the earliest representable time expires nothing
    let Some(cutoff) = Utc::now().checked_sub_signed(self.query_freshness) else {
      return Ok(0);
    };
    let cutoff = timestamp(cutoff);
    self
      .conn()?
      .execute(
        "DELETE FROM query_cache WHERE cached_at < ?",
        params![cutoff],
      )
      .map_err(|e| eyre!("Failed to purge expired queries: {}", e))
  }
}
