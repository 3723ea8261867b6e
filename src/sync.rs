//! Replays queued mutations once the network is back.
//!
//! A drain works on the outbox as it was when the drain started, in enqueue
//! order. Each action is deleted on a 2xx reply. Any other outcome bumps its
//! retry count, and an action that reaches `sync.max_attempts` is moved to
//! the discarded list and reported back to the caller. Nothing is atomic
//! across actions: if the process dies mid-drain, the actions not yet handled
//! stay queued for the next trigger.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::http::Request;
use crate::network::Network;
use crate::offline::{DiscardedAction, OfflineStore, PendingAction};

/// Background-sync registration tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTag {
  /// Drain the outbox
  Reservations,
  /// Reserved for notification sync; does nothing yet
  Notifications,
}

impl SyncTag {
  pub fn parse(tag: &str) -> Option<Self> {
    match tag {
      "sync-reservations" => Some(SyncTag::Reservations),
      "sync-notifications" => Some(SyncTag::Notifications),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      SyncTag::Reservations => "sync-reservations",
      SyncTag::Notifications => "sync-notifications",
    }
  }
}

/// What a drain did to each action it looked at.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainReport {
  /// Ids deleted after a successful replay
  pub replayed: Vec<String>,
  /// Ids that failed and stay queued
  pub retained: Vec<String>,
  /// Actions that ran out of retries during this drain
  pub discarded: Vec<DiscardedAction>,
}

/// Build the network request that replays `action`.
pub fn replay_request(action: &PendingAction, config: &Config) -> Result<Request> {
  let endpoint = config
    .sync
    .endpoints
    .get(&action.kind)
    .ok_or_else(|| eyre!("No replay endpoint for action kind '{}'", action.kind))?;

  let method = Method::from_bytes(endpoint.method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}' for {}: {}", endpoint.method, action.kind, e))?;
  let url = config.resolve(&endpoint.path)?;

  Request::get(url)
    .with_method(method)
    .with_header("X-Offline-Action-Id", &action.id)
    .with_json(&action.payload)
}

/// Replay one action. `Err` carries the reason it failed.
async fn replay(
  action: &PendingAction,
  network: &dyn Network,
  config: &Config,
) -> std::result::Result<(), String> {
  let request = replay_request(action, config).map_err(|e| e.to_string())?;

  match network.fetch(&request).await {
    Ok(response) if response.is_success() => Ok(()),
    Ok(response) => Err(format!("HTTP {}", response.status)),
    Err(e) => Err(e.to_string()),
  }
}

/// Drain the outbox against the network.
pub async fn drain(store: &OfflineStore, network: &dyn Network, config: &Config) -> Result<DrainReport> {
  let actions = store.pending_actions()?;
  let mut report = DrainReport::default();

  if actions.is_empty() {
    debug!("Outbox empty, nothing to sync");
    return Ok(report);
  }

  info!(count = actions.len(), "Replaying pending actions");

  for action in actions {
    match replay(&action, network, config).await {
      Ok(()) => {
        store.delete_action(&action.id)?;
        debug!(id = %action.id, kind = %action.kind, "Replayed pending action");
        report.replayed.push(action.id);
      }
      Err(reason) => {
        let Some(retry_count) = store.record_failure(&action.id)? else {
          debug!(id = %action.id, "Action left the outbox during sync, skipping");
          continue;
        };

        if retry_count >= config.sync.max_attempts {
          let action = PendingAction {
            retry_count,
            ..action
          };
          store.discard_action(&action, &reason)?;
          warn!(
            id = %action.id,
            kind = %action.kind,
            attempts = retry_count,
            reason = %reason,
            "Discarding pending action after repeated failures"
          );
          report.discarded.push(DiscardedAction {
            action,
            reason,
            discarded_at: Utc::now(),
          });
        } else {
          debug!(id = %action.id, retry_count, reason = %reason, "Replay failed, keeping action");
          report.retained.push(action.id);
        }
      }
    }
  }

  info!(
    replayed = report.replayed.len(),
    retained = report.retained.len(),
    discarded = report.discarded.len(),
    "Sync finished"
  );

  Ok(report)
}
