//! Worker lifecycle: install, activate, and control of open pages.

use color_eyre::{eyre::eyre, Result};
use futures::future::{join_all, try_join_all};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::CacheStorage;
use crate::config::CacheNames;
use crate::http::{Request, Response};
use crate::strategy::FetchContext;

/// Lifecycle states of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
  /// Created, install not started
  Parsed,
  Installing,
  /// Installed, not yet active
  Waiting,
  /// Intercepting requests
  Active,
  /// Failed install; terminal
  Redundant,
}

impl WorkerState {
  pub fn can_intercept_fetch(&self) -> bool {
    matches!(self, WorkerState::Active)
  }

  pub fn can_install(&self) -> bool {
    !matches!(self, WorkerState::Installing | WorkerState::Redundant)
  }

  pub fn can_activate(&self) -> bool {
    matches!(self, WorkerState::Waiting | WorkerState::Active)
  }
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      WorkerState::Parsed => write!(f, "parsed"),
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Waiting => write!(f, "waiting"),
      WorkerState::Active => write!(f, "active"),
      WorkerState::Redundant => write!(f, "redundant"),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
  /// Entries written to the static cache
  pub precached: usize,
  /// Secondary entries written to the dynamic cache
  pub secondary_cached: usize,
  /// Secondary URLs that could not be fetched
  pub secondary_failed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
  pub deleted_caches: Vec<String>,
  /// False when the outbox/snapshot store could not be opened
  pub offline_store_ready: bool,
  /// Clients now controlled by this version
  pub claimed: usize,
}

async fn fetch_ok(ctx: FetchContext<'_>, path: &str) -> Result<(String, Response)> {
  let request = Request::get(ctx.config.resolve(path)?);
  let response = ctx.network.fetch(&request).await?;
  if !response.is_success() {
    return Err(eyre!(
      "Fetching {} returned HTTP {}",
      request.url,
      response.status
    ));
  }
  Ok((request.cache_key(), response))
}

/// Populate caches for the current version.
///
/// The critical manifest goes into the static cache in one transaction and
/// must be fetched completely; any failure aborts install with no cache of
/// this version created. Only then are the other three caches opened, so the
/// presence of all four marks a completed install. The secondary manifest
/// goes into the dynamic cache entry by entry and failures are only logged.
pub async fn install(ctx: FetchContext<'_>) -> Result<InstallReport> {
  let manifests = &ctx.config.manifests;

  let entries = try_join_all(manifests.critical.iter().map(|path| fetch_ok(ctx, path)))
    .await
    .map_err(|e| eyre!("Failed to precache critical assets: {}", e))?;
  ctx.storage.put_all(&ctx.names.static_assets, &entries)?;
  info!(count = entries.len(), cache = %ctx.names.static_assets, "Precached critical assets");

  for name in ctx.names.all() {
    ctx.storage.open_cache(name)?;
  }

  let mut report = InstallReport {
    precached: entries.len(),
    ..Default::default()
  };

  let results = join_all(manifests.secondary.iter().map(|path| fetch_ok(ctx, path))).await;
  for (path, result) in manifests.secondary.iter().zip(results) {
    match result.and_then(|(key, response)| ctx.storage.put(&ctx.names.dynamic, &key, &response)) {
      Ok(()) => report.secondary_cached += 1,
      Err(e) => {
        warn!(path = %path, error = %e, "Failed to precache secondary asset");
        report.secondary_failed.push(path.clone());
      }
    }
  }

  Ok(report)
}

/// Delete every cache whose name is not one of the current four.
pub fn delete_stale_caches(storage: &dyn CacheStorage, names: &CacheNames) -> Result<Vec<String>> {
  let mut deleted = Vec::new();

  for name in storage.cache_names()? {
    if names.contains(&name) {
      continue;
    }
    storage.delete_cache(&name)?;
    debug!(cache = %name, "Deleted stale cache");
    deleted.push(name);
  }

  Ok(deleted)
}

/// An open page of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Client {
  pub id: String,
  pub url: String,
  /// Version of the worker controlling this page, if any
  pub controller: Option<String>,
}

/// Pages the worker can control.
#[derive(Debug, Default)]
pub struct ClientRegistry {
  clients: Mutex<Vec<Client>>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Vec<Client>> {
    self.clients.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Track a page that was opened without a controller.
  pub fn register(&self, url: &str) -> String {
    let id = Uuid::new_v4().to_string();
    self.lock().push(Client {
      id: id.clone(),
      url: url.to_string(),
      controller: None,
    });
    id
  }

  /// Open a new window already controlled by `version`.
  pub fn open_window(&self, url: &str, version: Option<&str>) -> Client {
    let client = Client {
      id: Uuid::new_v4().to_string(),
      url: url.to_string(),
      controller: version.map(String::from),
    };
    self.lock().push(client.clone());
    client
  }

  /// Take control of every page. Returns how many pages changed controller.
  pub fn claim(&self, version: &str) -> usize {
    let mut clients = self.lock();
    let mut changed = 0;
    for client in clients.iter_mut() {
      if client.controller.as_deref() != Some(version) {
        client.controller = Some(version.to_string());
        changed += 1;
      }
    }
    changed
  }

  pub fn list(&self) -> Vec<Client> {
    self.lock().clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::config::Config;
  use crate::testing::MockNetwork;

  const ORIGIN: &str = "https://library.example.edu";

  fn serve_manifests(network: &MockNetwork, config: &Config) {
    for path in config
      .manifests
      .critical
      .iter()
      .chain(config.manifests.secondary.iter())
    {
      network.respond_text(&format!("{}{}", ORIGIN, path), 200, path);
    }
  }

  #[test]
  fn test_state_rules() {
    assert!(WorkerState::Active.can_intercept_fetch());
    assert!(!WorkerState::Waiting.can_intercept_fetch());
    assert!(WorkerState::Parsed.can_install());
    assert!(!WorkerState::Redundant.can_install());
    assert!(!WorkerState::Parsed.can_activate());
    assert!(WorkerState::Waiting.can_activate());
  }

  #[tokio::test]
  async fn test_install_populates_static_and_dynamic() {
    let config = Config::for_origin(ORIGIN).unwrap();
    let names = config.cache_names();
    let storage = SqliteStorage::open_in_memory().unwrap();
    let network = MockNetwork::new();
    serve_manifests(&network, &config);
    let ctx = FetchContext {
      storage: &storage,
      network: &network,
      config: &config,
      names: &names,
    };

    let report = install(ctx).await.unwrap();

    assert_eq!(report.precached, config.manifests.critical.len());
    assert_eq!(report.secondary_cached, config.manifests.secondary.len());
    assert_eq!(
      storage.cache_names().unwrap(),
      vec!["static-v2", "dynamic-v2", "api-v2", "images-v2"]
    );
    assert!(storage
      .lookup("static-v2", &format!("{}/offline.html", ORIGIN))
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_install_fails_when_critical_asset_fails() {
    let config = Config::for_origin(ORIGIN).unwrap();
    let names = config.cache_names();
    let storage = SqliteStorage::open_in_memory().unwrap();
    let network = MockNetwork::new();
    serve_manifests(&network, &config);
    network.fail(&format!("{}/manifest.json", ORIGIN));
    let ctx = FetchContext {
      storage: &storage,
      network: &network,
      config: &config,
      names: &names,
    };

    assert!(install(ctx).await.is_err());
    assert!(storage.keys("static-v2").unwrap().is_empty());
    assert!(storage.cache_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_tolerates_secondary_failures() {
    let config = Config::for_origin(ORIGIN).unwrap();
    let names = config.cache_names();
    let storage = SqliteStorage::open_in_memory().unwrap();
    let network = MockNetwork::new();
    serve_manifests(&network, &config);
    network.respond_text(&format!("{}/books", ORIGIN), 500, "down");
    network.fail(&format!("{}/reservations", ORIGIN));
    let ctx = FetchContext {
      storage: &storage,
      network: &network,
      config: &config,
      names: &names,
    };

    let report = install(ctx).await.unwrap();

    assert_eq!(report.secondary_failed, vec!["/books", "/reservations"]);
    assert_eq!(report.secondary_cached, config.manifests.secondary.len() - 2);
  }

  #[test]
  fn test_delete_stale_caches() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    for name in [
      "static-v1",
      "dynamic-v1",
      "api-v1",
      "images-v1",
      "static-v2",
      "dynamic-v2",
      "api-v2",
      "images-v2",
    ] {
      storage.open_cache(name).unwrap();
    }

    let deleted = delete_stale_caches(&storage, &CacheNames::for_version("v2")).unwrap();

    assert_eq!(deleted, vec!["static-v1", "dynamic-v1", "api-v1", "images-v1"]);
    assert_eq!(
      storage.cache_names().unwrap(),
      vec!["static-v2", "dynamic-v2", "api-v2", "images-v2"]
    );
  }

  #[test]
  fn test_claim_takes_over_all_clients() {
    let clients = ClientRegistry::new();
    clients.register("/dashboard");
    clients.register("/books");
    clients.open_window("/notifications", Some("v2"));

    assert_eq!(clients.claim("v2"), 2);
    assert!(clients
      .list()
      .iter()
      .all(|c| c.controller.as_deref() == Some("v2")));
    assert_eq!(clients.claim("v2"), 0);
  }
}
