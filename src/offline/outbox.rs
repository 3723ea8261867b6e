//! Outbox of user mutations recorded while offline.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::{parse_payload, parse_timestamp, timestamp, OfflineStore};

/// A queued mutation waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
  pub id: String,
  /// Selects the replay endpoint, e.g. `reservation.create`
  pub kind: String,
  pub payload: Value,
  pub created_at: DateTime<Utc>,
  pub retry_count: u32,
}

/// An action that ran out of retries, kept so it can be shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscardedAction {
  pub action: PendingAction,
  /// Last failure seen before giving up
  pub reason: String,
  pub discarded_at: DateTime<Utc>,
}

fn action_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, u32)> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn build_action(
  (id, kind, payload, created_at, retry_count): (String, String, String, String, u32),
) -> Result<PendingAction> {
  Ok(PendingAction {
    id,
    kind,
    payload: parse_payload(&payload)?,
    created_at: parse_timestamp(&created_at)?,
    retry_count,
  })
}

impl OfflineStore {
  /// Queue a mutation. Returns the new action id.
  pub fn enqueue(&self, kind: &str, payload: &Value) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let payload =
      serde_json::to_string(payload).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    self
      .conn()?
      .execute(
        "INSERT INTO pending_actions (id, kind, payload, created_at, retry_count)
         VALUES (?, ?, ?, ?, 0)",
        params![id, kind, payload, timestamp(Utc::now())],
      )
      .map_err(|e| eyre!("Failed to enqueue {} action: {}", kind, e))?;

    Ok(id)
  }

  /// All pending actions in enqueue order.
  pub fn pending_actions(&self) -> Result<Vec<PendingAction>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, kind, payload, created_at, retry_count FROM pending_actions ORDER BY seq",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], action_from_row)
      .map_err(|e| eyre!("Failed to list pending actions: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read pending action: {}", e))?;

    rows.into_iter().map(build_action).collect()
  }

  pub fn pending_action(&self, id: &str) -> Result<Option<PendingAction>> {
    let row = self
      .conn()?
      .query_row(
        "SELECT id, kind, payload, created_at, retry_count FROM pending_actions WHERE id = ?",
        params![id],
        action_from_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to load pending action {}: {}", id, e))?;

    row.map(build_action).transpose()
  }

  pub fn pending_count(&self) -> Result<usize> {
    let n: i64 = self
      .conn()?
      .query_row("SELECT COUNT(*) FROM pending_actions", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count pending actions: {}", e))?;
    Ok(n as usize)
  }

  /// Remove an action after a successful replay.
  pub fn delete_action(&self, id: &str) -> Result<bool> {
    let removed = self
      .conn()?
      .execute("DELETE FROM pending_actions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete pending action {}: {}", id, e))?;
    Ok(removed > 0)
  }

  /// Bump the retry count of an action and return the new count.
  ///
  /// `None` when the action is no longer queued, e.g. after `clear`.
  pub fn record_failure(&self, id: &str) -> Result<Option<u32>> {
    let conn = self.conn()?;
    let updated = conn
      .execute(
        "UPDATE pending_actions SET retry_count = retry_count + 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to update pending action {}: {}", id, e))?;
    if updated == 0 {
      return Ok(None);
    }

    conn
      .query_row(
        "SELECT retry_count FROM pending_actions WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read retry count of {}: {}", id, e))
  }

  /// Move an action from the outbox to the discarded list.
  pub fn discard_action(&self, action: &PendingAction, reason: &str) -> Result<()> {
    let payload = serde_json::to_string(&action.payload)
      .map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR REPLACE INTO discarded_actions
         (id, kind, payload, created_at, retry_count, reason, discarded_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        action.id,
        action.kind,
        payload,
        timestamp(action.created_at),
        action.retry_count,
        reason,
        timestamp(Utc::now()),
      ],
    )
    .map_err(|e| eyre!("Failed to record discarded action {}: {}", action.id, e))?;

    tx.execute(
      "DELETE FROM pending_actions WHERE id = ?",
      params![action.id],
    )
    .map_err(|e| eyre!("Failed to delete pending action {}: {}", action.id, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  /// Discarded actions, oldest first.
  pub fn discarded_actions(&self) -> Result<Vec<DiscardedAction>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, kind, payload, created_at, retry_count, reason, discarded_at
         FROM discarded_actions ORDER BY discarded_at",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((action_from_row(row)?, row.get::<_, String>(5)?, row.get::<_, String>(6)?))
      })
      .map_err(|e| eyre!("Failed to list discarded actions: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read discarded action: {}", e))?;

    rows
      .into_iter()
      .map(|(action, reason, discarded_at)| {
        Ok(DiscardedAction {
          action: build_action(action)?,
          reason,
          discarded_at: parse_timestamp(&discarded_at)?,
        })
      })
      .collect()
  }

  /// Drop a discarded action once the user has seen it.
  pub fn forget_discarded(&self, id: &str) -> Result<bool> {
    let removed = self
      .conn()?
      .execute("DELETE FROM discarded_actions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete discarded action {}: {}", id, e))?;
    Ok(removed > 0)
  }
}
