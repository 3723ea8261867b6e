//! The worker: one dispatch function per event kind.
//!
//! All state the handlers use lives on [`ServiceWorker`]; nothing is read
//! from globals. Each `handle_*` method can be driven directly with a
//! synthetic request or event.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{CacheResult, CacheStorage};
use crate::config::{CacheNames, Config};
use crate::http::{Request, Response};
use crate::lifecycle::{self, ActivationReport, ClientRegistry, InstallReport, WorkerState};
use crate::network::Network;
use crate::offline::OfflineStore;
use crate::push::{self, ClickOutcome, Notification};
use crate::router::{self, Route};
use crate::strategy::{self, FetchContext, OnMiss};
use crate::sync::{self, DrainReport, SyncTag};

/// Where the offline store lives.
#[derive(Debug, Clone)]
pub enum OfflineLocation {
  /// `storage.offline_path` or the data directory
  Configured,
  Path(PathBuf),
  Memory,
}

pub struct ServiceWorker<S: CacheStorage> {
  config: Config,
  names: CacheNames,
  storage: Arc<S>,
  network: Arc<dyn Network>,
  state: RwLock<WorkerState>,
  clients: ClientRegistry,
  offline_location: OfflineLocation,
  offline: OnceLock<Arc<OfflineStore>>,
  online: AtomicBool,
  /// One drain at a time
  drain_lock: tokio::sync::Mutex<()>,
}

impl<S: CacheStorage> ServiceWorker<S> {
  pub fn new(config: Config, storage: S, network: Arc<dyn Network>) -> Self {
    let names = config.cache_names();
    Self {
      config,
      names,
      storage: Arc::new(storage),
      network,
      state: RwLock::new(WorkerState::Parsed),
      clients: ClientRegistry::new(),
      offline_location: OfflineLocation::Configured,
      offline: OnceLock::new(),
      online: AtomicBool::new(true),
      drain_lock: tokio::sync::Mutex::new(()),
    }
  }

  pub fn with_offline_location(mut self, location: OfflineLocation) -> Self {
    self.offline_location = location;
    self
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn clients(&self) -> &ClientRegistry {
    &self.clients
  }

  pub fn state(&self) -> WorkerState {
    *self.state.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_state(&self, state: WorkerState) {
    let mut current = self.state.write().unwrap_or_else(PoisonError::into_inner);
    let from = *current;
    if from != state {
      debug!(%from, to = %state, "Worker state change");
      *current = state;
    }
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  fn ctx(&self) -> FetchContext<'_> {
    FetchContext {
      storage: self.storage.as_ref(),
      network: self.network.as_ref(),
      config: &self.config,
      names: &self.names,
    }
  }

  /// Install event: precache, then skip waiting.
  pub async fn handle_install(&self) -> Result<InstallReport> {
    let state = self.state();
    if !state.can_install() {
      return Err(eyre!("Cannot install a worker in state {}", state));
    }

    self.set_state(WorkerState::Installing);
    info!(version = %self.config.version, "Installing worker");

    match lifecycle::install(self.ctx()).await {
      Ok(report) => {
        self.set_state(WorkerState::Waiting);
        Ok(report)
      }
      Err(e) => {
        self.set_state(WorkerState::Redundant);
        Err(e)
      }
    }
  }

  /// Activate event: drop old caches, open the offline store, claim pages.
  pub async fn handle_activate(&self) -> Result<ActivationReport> {
    let state = self.state();
    if !state.can_activate() {
      return Err(eyre!("Cannot activate a worker in state {}", state));
    }

    let storage: &dyn CacheStorage = self.storage.as_ref();
    let (deleted, offline_store_ready) = tokio::join!(
      async { lifecycle::delete_stale_caches(storage, &self.names) },
      async {
        match self.offline_store() {
          Ok(_) => true,
          Err(e) => {
            warn!(error = %e, "Offline store unavailable, continuing without it");
            false
          }
        }
      }
    );
    let deleted_caches = deleted?;

    self.set_state(WorkerState::Active);
    let claimed = self.clients.claim(&self.config.version);

    info!(
      version = %self.config.version,
      deleted = deleted_caches.len(),
      claimed,
      "Worker active"
    );

    Ok(ActivationReport {
      deleted_caches,
      offline_store_ready,
      claimed,
    })
  }

  /// Install followed by immediate activation.
  pub async fn start(&self) -> Result<(InstallReport, ActivationReport)> {
    let installed = self.handle_install().await?;
    let activated = self.handle_activate().await?;
    Ok((installed, activated))
  }

  /// Pick up an earlier install of the same version without refetching.
  ///
  /// Returns false when the current caches are not all present.
  pub fn resume(&self) -> Result<bool> {
    let existing = self.storage.cache_names()?;
    let installed = self
      .names
      .all()
      .iter()
      .all(|name| existing.iter().any(|e| e.as_str() == *name));

    if !installed {
      return Ok(false);
    }

    if let Err(e) = self.offline_store() {
      warn!(error = %e, "Offline store unavailable, continuing without it");
    }
    self.set_state(WorkerState::Active);
    Ok(true)
  }

  /// Fetch event.
  pub async fn handle_fetch(&self, request: &Request) -> Result<CacheResult<Response>> {
    if !self.state().can_intercept_fetch() {
      let response = self.network.fetch(request).await?;
      return Ok(CacheResult::passthrough(response));
    }

    let route = router::classify(request, &self.config);
    debug!(url = %request.url, method = %request.method, route = %route, "Routing request");

    let ctx = self.ctx();
    match route {
      Route::Bypass => {
        let response = self.network.fetch(request).await?;
        Ok(CacheResult::passthrough(response))
      }
      Route::Navigation => strategy::network_first(ctx, request, OnMiss::OfflinePage).await,
      Route::Dynamic => strategy::network_first(ctx, request, OnMiss::Propagate).await,
      Route::Api => strategy::network_first_json(ctx, request).await,
      Route::Static => strategy::cache_first(ctx, request).await,
      Route::Image => strategy::cache_first_with_placeholder(ctx, request).await,
    }
  }

  /// The outbox/snapshot store, opened on first use.
  pub fn offline_store(&self) -> Result<Arc<OfflineStore>> {
    if let Some(store) = self.offline.get() {
      return Ok(Arc::clone(store));
    }

    let store = match &self.offline_location {
      OfflineLocation::Configured => OfflineStore::open(&self.config.offline_db_path()?)?,
      OfflineLocation::Path(path) => OfflineStore::open(path)?,
      OfflineLocation::Memory => OfflineStore::open_in_memory()?,
    };
    let hours = self.config.storage.query_freshness_hours;
    let freshness = chrono::Duration::try_hours(hours)
      .ok_or_else(|| eyre!("Query freshness of {} hours is out of range", hours))?;
    let store = store.with_query_freshness(freshness);

    // A concurrent caller may have set it first
    let _ = self.offline.set(Arc::new(store));
    self
      .offline
      .get()
      .map(Arc::clone)
      .ok_or_else(|| eyre!("Offline store failed to initialize"))
  }

  /// Record a mutation for later replay. Never touches the network.
  pub fn enqueue_action(&self, kind: &str, payload: &Value) -> Result<String> {
    let id = self.offline_store()?.enqueue(kind, payload)?;
    debug!(id = %id, kind, "Queued pending action");
    Ok(id)
  }

  async fn drain(&self) -> Result<DrainReport> {
    let _guard = self.drain_lock.lock().await;
    let store = self.offline_store()?;
    sync::drain(&store, self.network.as_ref(), &self.config).await
  }

  /// Background-sync event. Returns `None` for tags that do no replay.
  pub async fn handle_sync(&self, tag: &str) -> Result<Option<DrainReport>> {
    match SyncTag::parse(tag) {
      Some(SyncTag::Reservations) => self.drain().await.map(Some),
      Some(SyncTag::Notifications) => {
        debug!("Notification sync requested, nothing to do");
        Ok(None)
      }
      None => {
        debug!(tag, "Ignoring unknown sync tag");
        Ok(None)
      }
    }
  }

  /// Connectivity change. Going from offline to online drains the outbox.
  pub async fn handle_connectivity(&self, online: bool) -> Result<Option<DrainReport>> {
    let was_online = self.online.swap(online, Ordering::SeqCst);
    if online && !was_online {
      info!("Connectivity restored, syncing pending actions");
      return self.drain().await.map(Some);
    }
    if !online && was_online {
      info!("Connectivity lost");
    }
    Ok(None)
  }

  /// Push event.
  pub fn handle_push(&self, payload: Option<&str>) -> Notification {
    push::notification_for_push(payload, &self.config.notifications)
  }

  /// Notification click. "view" opens a window on the dashboard.
  pub fn handle_notification_click(&self, action: Option<&str>) -> Result<ClickOutcome> {
    let outcome = push::handle_click(action, &self.config.notifications);
    if let ClickOutcome::OpenWindow(path) = &outcome {
      let url = self.config.resolve(path)?;
      let controller = self
        .state()
        .can_intercept_fetch()
        .then_some(self.config.version.as_str());
      self.clients.open_window(url.as_str(), controller);
    }
    Ok(outcome)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStorage};
  use crate::http::Destination;
  use crate::testing::MockNetwork;
  use reqwest::Method;
  use serde_json::json;

  const ORIGIN: &str = "https://library.example.edu";

  fn url(path: &str) -> String {
    format!("{}{}", ORIGIN, path)
  }

  fn get(path: &str) -> Request {
    Request::parse(&url(path)).unwrap()
  }

  fn serve_manifests(network: &MockNetwork, config: &Config) {
    for path in config
      .manifests
      .critical
      .iter()
      .chain(config.manifests.secondary.iter())
    {
      network.respond_text(&url(path), 200, &format!("precached {}", path));
    }
  }

  fn worker_with(config: Config, network: Arc<MockNetwork>) -> ServiceWorker<SqliteStorage> {
    ServiceWorker::new(config, SqliteStorage::open_in_memory().unwrap(), network)
      .with_offline_location(OfflineLocation::Memory)
  }

  async fn active_worker() -> (ServiceWorker<SqliteStorage>, Arc<MockNetwork>) {
    let config = Config::for_origin(ORIGIN).unwrap();
    let network = Arc::new(MockNetwork::new());
    serve_manifests(&network, &config);
    let worker = worker_with(config, network.clone());
    worker.start().await.unwrap();
    network.reset_calls();
    (worker, network)
  }

  #[tokio::test]
  async fn test_static_hit_makes_no_network_call() {
    let (worker, network) = active_worker().await;

    // Precached during install
    let result = worker.handle_fetch(&get("/manifest.json")).await.unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(network.calls(), 0);
  }

  #[tokio::test]
  async fn test_manifest_fetched_once_then_served_from_cache() {
    let config = Config::for_origin(ORIGIN).unwrap();
    let network = Arc::new(MockNetwork::new());
    let worker = worker_with(config, network.clone());
    // Activate with an empty static cache
    worker.set_state(WorkerState::Active);
    network.respond_text(&url("/manifest.json"), 200, "{\"name\":\"Library\"}");

    let first = worker.handle_fetch(&get("/manifest.json")).await.unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(network.calls_to(&url("/manifest.json")), 1);
    assert!(worker
      .storage()
      .lookup("static-v2", &url("/manifest.json"))
      .unwrap()
      .is_some());

    network.reset_calls();
    let second = worker.handle_fetch(&get("/manifest.json")).await.unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data.text(), "{\"name\":\"Library\"}");
    assert_eq!(network.calls(), 0);
  }

  #[tokio::test]
  async fn test_navigation_offline_without_entry_gets_offline_page() {
    let (worker, network) = active_worker().await;
    network.set_offline(true);

    let request = Request::navigate(url::Url::parse(&url("/reservations/history")).unwrap());
    let result = worker.handle_fetch(&request).await.unwrap();

    assert_eq!(result.source, CacheSource::Fallback);
    assert_eq!(result.data.text(), "precached /offline.html");
  }

  #[tokio::test]
  async fn test_read_only_api_served_from_cache_when_offline() {
    let (worker, network) = active_worker().await;
    network.respond_text(&url("/api/books?available=true"), 200, "[{\"id\":\"b1\"}]");

    let online = worker
      .handle_fetch(&get("/api/books?available=true"))
      .await
      .unwrap();
    assert_eq!(online.source, CacheSource::Network);

    network.set_offline(true);
    let offline = worker
      .handle_fetch(&get("/api/books?available=true"))
      .await
      .unwrap();

    assert_eq!(offline.source, CacheSource::Cache);
    assert_eq!(offline.data.status, 200);
    assert_eq!(offline.data.text(), "[{\"id\":\"b1\"}]");
  }

  #[tokio::test]
  async fn test_api_offline_without_cache_is_json_503() {
    let (worker, network) = active_worker().await;
    network.set_offline(true);

    let result = worker
      .handle_fetch(&get("/api/reservations/mine"))
      .await
      .unwrap();

    assert_eq!(result.data.status, 503);
    let body: serde_json::Value = result.data.parse_json().unwrap();
    assert_eq!(body["offline"], json!(true));
    assert!(worker.storage().keys("api-v2").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_non_get_goes_straight_to_network() {
    let (worker, network) = active_worker().await;
    network.respond_text(&url("/api/reservations"), 201, "{}");

    let request = get("/api/reservations").with_method(Method::POST);
    let result = worker.handle_fetch(&request).await.unwrap();

    assert_eq!(result.source, CacheSource::Passthrough);
    assert_eq!(network.calls(), 1);
    assert!(worker.storage().keys("api-v2").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_fetch_before_activation_is_passthrough() {
    let config = Config::for_origin(ORIGIN).unwrap();
    let network = Arc::new(MockNetwork::new());
    network.respond_text(&url("/app.js"), 200, "js");
    let worker = worker_with(config, network.clone());

    let result = worker.handle_fetch(&get("/app.js")).await.unwrap();

    assert_eq!(result.source, CacheSource::Passthrough);
    assert!(worker.storage().cache_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_image_offline_gets_placeholder() {
    let (worker, network) = active_worker().await;
    network.set_offline(true);

    let request = get("/covers/99.jpg").with_destination(Destination::Image);
    let result = worker.handle_fetch(&request).await.unwrap();

    assert_eq!(result.data.header("content-type"), Some("image/svg+xml"));
    assert!(worker.storage().keys("images-v2").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_reinstall_same_version_is_idempotent() {
    let (worker, _network) = active_worker().await;
    let before: Vec<Vec<String>> = worker
      .names
      .all()
      .iter()
      .map(|name| worker.storage().keys(name).unwrap())
      .collect();

    worker.handle_install().await.unwrap();

    assert_eq!(
      worker.storage().cache_names().unwrap(),
      vec!["static-v2", "dynamic-v2", "api-v2", "images-v2"]
    );
    let after: Vec<Vec<String>> = worker
      .names
      .all()
      .iter()
      .map(|name| worker.storage().keys(name).unwrap())
      .collect();
    assert_eq!(before, after);
    assert_eq!(after[0].len(), worker.config().manifests.critical.len());
  }

  #[tokio::test]
  async fn test_activation_deletes_previous_version() {
    let config = Config::for_origin(ORIGIN).unwrap();
    let network = Arc::new(MockNetwork::new());
    serve_manifests(&network, &config);
    let storage = SqliteStorage::open_in_memory().unwrap();
    for name in ["static-v1", "dynamic-v1", "api-v1", "images-v1"] {
      storage.open_cache(name).unwrap();
    }
    let worker = ServiceWorker::new(config, storage, network)
      .with_offline_location(OfflineLocation::Memory);

    worker.handle_install().await.unwrap();
    let report = worker.handle_activate().await.unwrap();

    assert_eq!(
      report.deleted_caches,
      vec!["static-v1", "dynamic-v1", "api-v1", "images-v1"]
    );
    assert!(report.offline_store_ready);
    assert_eq!(worker.state(), WorkerState::Active);
  }

  #[tokio::test]
  async fn test_activation_survives_offline_store_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::for_origin(ORIGIN).unwrap();
    let network = Arc::new(MockNetwork::new());
    serve_manifests(&network, &config);
    // A directory cannot be opened as a database file
    let worker = ServiceWorker::new(config, SqliteStorage::open_in_memory().unwrap(), network)
      .with_offline_location(OfflineLocation::Path(dir.path().to_path_buf()));

    let (_, report) = worker.start().await.unwrap();

    assert!(!report.offline_store_ready);
    assert_eq!(worker.state(), WorkerState::Active);
  }

  #[tokio::test]
  async fn test_failed_install_makes_worker_redundant() {
    let config = Config::for_origin(ORIGIN).unwrap();
    let network = Arc::new(MockNetwork::new());
    network.set_offline(true);
    let worker = worker_with(config, network);

    assert!(worker.handle_install().await.is_err());
    assert_eq!(worker.state(), WorkerState::Redundant);
    assert!(worker.handle_activate().await.is_err());
  }

  #[tokio::test]
  async fn test_failed_install_is_not_resumed_by_next_process() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("caches.db");
    let network = Arc::new(MockNetwork::new());
    network.set_offline(true);

    let failed = ServiceWorker::new(
      Config::for_origin(ORIGIN).unwrap(),
      SqliteStorage::open(&db).unwrap(),
      network.clone(),
    )
    .with_offline_location(OfflineLocation::Memory);
    assert!(failed.handle_install().await.is_err());
    assert_eq!(failed.state(), WorkerState::Redundant);
    drop(failed);

    let next = ServiceWorker::new(
      Config::for_origin(ORIGIN).unwrap(),
      SqliteStorage::open(&db).unwrap(),
      network.clone(),
    )
    .with_offline_location(OfflineLocation::Memory);

    assert!(!next.resume().unwrap());
    assert_eq!(next.state(), WorkerState::Parsed);

    network.set_offline(false);
    network.respond_text(&url("/manifest.json"), 200, "{}");
    let result = next.handle_fetch(&get("/manifest.json")).await.unwrap();
    assert_eq!(result.source, CacheSource::Passthrough);
  }

  #[tokio::test]
  async fn test_completed_install_is_resumed_by_next_process() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("caches.db");
    let config = Config::for_origin(ORIGIN).unwrap();
    let network = Arc::new(MockNetwork::new());
    serve_manifests(&network, &config);

    let first = ServiceWorker::new(
      config.clone(),
      SqliteStorage::open(&db).unwrap(),
      network.clone(),
    )
    .with_offline_location(OfflineLocation::Memory);
    first.start().await.unwrap();
    drop(first);

    let next = ServiceWorker::new(config, SqliteStorage::open(&db).unwrap(), network)
      .with_offline_location(OfflineLocation::Memory);

    assert!(next.resume().unwrap());
    assert_eq!(next.state(), WorkerState::Active);
  }

  #[tokio::test]
  async fn test_out_of_range_freshness_does_not_stop_activation() {
    let mut config = Config::for_origin(ORIGIN).unwrap();
    config.storage.query_freshness_hours = i64::MAX;
    let network = Arc::new(MockNetwork::new());
    serve_manifests(&network, &config);
    let worker = worker_with(config, network);

    let (_, report) = worker.start().await.unwrap();

    assert!(!report.offline_store_ready);
    assert_eq!(worker.state(), WorkerState::Active);
    assert!(worker.offline_store().is_err());
  }

  #[tokio::test]
  async fn test_activate_claims_open_pages() {
    let config = Config::for_origin(ORIGIN).unwrap();
    let network = Arc::new(MockNetwork::new());
    serve_manifests(&network, &config);
    let worker = worker_with(config, network);
    worker.clients().register(&url("/dashboard"));

    let (_, report) = worker.start().await.unwrap();

    assert_eq!(report.claimed, 1);
    assert_eq!(worker.clients().list()[0].controller.as_deref(), Some("v2"));
  }

  #[tokio::test]
  async fn test_outbox_roundtrip_through_sync_tag() {
    let (worker, network) = active_worker().await;
    network.respond_text(&url("/api/reservations"), 201, "{}");

    let id = worker
      .enqueue_action("reservation.create", &json!({"bookId": "b1"}))
      .unwrap();
    assert_eq!(network.calls(), 0);

    let report = worker.handle_sync("sync-reservations").await.unwrap().unwrap();

    assert_eq!(report.replayed, vec![id.clone()]);
    assert!(worker
      .offline_store()
      .unwrap()
      .pending_action(&id)
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_notification_sync_is_noop() {
    let (worker, network) = active_worker().await;
    worker.enqueue_action("reservation.create", &json!({})).unwrap();

    assert!(worker.handle_sync("sync-notifications").await.unwrap().is_none());
    assert!(worker.handle_sync("sync-unknown").await.unwrap().is_none());
    assert_eq!(network.calls(), 0);
    assert_eq!(worker.offline_store().unwrap().pending_count().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_reconnect_drains_outbox() {
    let (worker, network) = active_worker().await;
    network.respond_text(&url("/api/reservations/cancel"), 200, "{}");

    assert!(worker.handle_connectivity(false).await.unwrap().is_none());
    worker
      .enqueue_action("reservation.cancel", &json!({"reservationId": "r1"}))
      .unwrap();

    let report = worker.handle_connectivity(true).await.unwrap().unwrap();
    assert_eq!(report.replayed.len(), 1);

    // Already online: no second drain
    assert!(worker.handle_connectivity(true).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_repeated_sync_failures_surface_discarded_action() {
    let (worker, network) = active_worker().await;
    network.set_offline(true);
    let id = worker
      .enqueue_action("reservation.create", &json!({"bookId": "b4"}))
      .unwrap();

    for _ in 0..3 {
      worker.handle_sync("sync-reservations").await.unwrap();
    }

    let store = worker.offline_store().unwrap();
    assert!(store.pending_action(&id).unwrap().is_none());
    assert_eq!(store.discarded_actions().unwrap()[0].action.id, id);
  }

  #[tokio::test]
  async fn test_view_click_opens_dashboard_window() {
    let (worker, _network) = active_worker().await;

    let outcome = worker.handle_notification_click(Some("view")).unwrap();

    assert_eq!(outcome, ClickOutcome::OpenWindow("/dashboard".to_string()));
    let clients = worker.clients().list();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].url, url("/dashboard"));
    assert_eq!(clients[0].controller.as_deref(), Some("v2"));

    assert_eq!(
      worker.handle_notification_click(Some("dismiss")).unwrap(),
      ClickOutcome::Dismissed
    );
    assert_eq!(worker.clients().list().len(), 1);
  }

  #[tokio::test]
  async fn test_push_uses_payload_text() {
    let (worker, _network) = active_worker().await;
    let notification = worker.handle_push(Some("Book due tomorrow"));
    assert_eq!(notification.body, "Book due tomorrow");
    assert_eq!(notification.url, "/dashboard");
  }
}
