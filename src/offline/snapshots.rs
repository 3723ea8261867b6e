//! Last-known-good copies of user-scoped collections for offline reads.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use super::{parse_payload, parse_timestamp, timestamp, OfflineStore};

/// Collections that are kept for offline reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotCategory {
  Books,
  Reservations,
  Notifications,
}

impl SnapshotCategory {
  pub fn as_str(&self) -> &'static str {
    match self {
      SnapshotCategory::Books => "books",
      SnapshotCategory::Reservations => "reservations",
      SnapshotCategory::Notifications => "notifications",
    }
  }
}

impl FromStr for SnapshotCategory {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "books" => Ok(SnapshotCategory::Books),
      "reservations" => Ok(SnapshotCategory::Reservations),
      "notifications" => Ok(SnapshotCategory::Notifications),
      other => Err(eyre!("Unknown snapshot category: {}", other)),
    }
  }
}

impl std::fmt::Display for SnapshotCategory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One stored collection for one owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
  /// `"{category}:{owner}"`
  pub id: String,
  pub category: SnapshotCategory,
  pub owner: String,
  pub payload: Value,
  pub captured_at: DateTime<Utc>,
}

fn snapshot_id(category: SnapshotCategory, owner: &str) -> String {
  format!("{}:{}", category, owner)
}

type SnapshotRow = (String, String, String, String, String);

fn build_snapshot((id, category, owner, payload, captured_at): SnapshotRow) -> Result<Snapshot> {
  Ok(Snapshot {
    id,
    category: category.parse()?,
    owner,
    payload: parse_payload(&payload)?,
    captured_at: parse_timestamp(&captured_at)?,
  })
}

impl OfflineStore {
  /// Replace the snapshot for `(category, owner)` wholesale.
  pub fn save_snapshot(
    &self,
    category: SnapshotCategory,
    owner: &str,
    payload: &Value,
  ) -> Result<Snapshot> {
    let snapshot = Snapshot {
      id: snapshot_id(category, owner),
      category,
      owner: owner.to_string(),
      payload: payload.clone(),
      captured_at: Utc::now(),
    };
    let data =
      serde_json::to_string(payload).map_err(|e| eyre!("Failed to serialize snapshot: {}", e))?;

    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO offline_data (id, category, owner, payload, captured_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          snapshot.id,
          category.as_str(),
          owner,
          data,
          timestamp(snapshot.captured_at)
        ],
      )
      .map_err(|e| eyre!("Failed to save snapshot {}: {}", snapshot.id, e))?;

    Ok(snapshot)
  }

  pub fn snapshot(&self, category: SnapshotCategory, owner: &str) -> Result<Option<Snapshot>> {
    let id = snapshot_id(category, owner);
    let row: Option<SnapshotRow> = self
      .conn()?
      .query_row(
        "SELECT id, category, owner, payload, captured_at FROM offline_data WHERE id = ?",
        params![id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to load snapshot {}: {}", id, e))?;

    row.map(build_snapshot).transpose()
  }

  /// All snapshots in a category, ordered by owner.
  pub fn snapshots(&self, category: SnapshotCategory) -> Result<Vec<Snapshot>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, category, owner, payload, captured_at FROM offline_data
         WHERE category = ? ORDER BY owner",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![category.as_str()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .map_err(|e| eyre!("Failed to list {} snapshots: {}", category, e))?
      .collect::<rusqlite::Result<Vec<SnapshotRow>>>()
      .map_err(|e| eyre!("Failed to read snapshot: {}", e))?;

    rows.into_iter().map(build_snapshot).collect()
  }
}
