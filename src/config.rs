use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

/// Everything the worker needs, passed in at startup.
///
/// Only `origin` is required in the YAML file; every other section falls
/// back to the values the library app ships with.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin of the application, e.g. `https://library.example.edu`
  pub origin: Url,
  /// Version tag appended to every cache name
  #[serde(default = "default_version")]
  pub version: String,
  #[serde(default)]
  pub manifests: ManifestConfig,
  #[serde(default)]
  pub routing: RoutingConfig,
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub fallback: FallbackConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub notifications: NotificationConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  /// Optional network timeout in seconds (none by default)
  pub request_timeout_secs: Option<u64>,
}

fn default_version() -> String {
  "v2".to_string()
}

/// URLs fetched during install.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
  /// Must all succeed or install fails
  pub critical: Vec<String>,
  /// Best-effort, stored in the dynamic cache
  pub secondary: Vec<String>,
}

impl Default for ManifestConfig {
  fn default() -> Self {
    Self {
      critical: strings(&[
        "/",
        "/offline.html",
        "/manifest.json",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
      ]),
      secondary: strings(&[
        "/dashboard",
        "/books",
        "/reservations",
        "/notifications",
      ]),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
  pub api_prefix: String,
  /// Build output directories
  pub static_prefixes: Vec<String>,
  /// Script, style and font extensions, including the dot
  pub static_extensions: Vec<String>,
  pub manifest_path: String,
}

impl Default for RoutingConfig {
  fn default() -> Self {
    Self {
      api_prefix: "/api/".to_string(),
      static_prefixes: strings(&["/_next/static/", "/static/"]),
      static_extensions: strings(&[".js", ".css", ".woff", ".woff2", ".ttf", ".otf", ".eot"]),
      manifest_path: "/manifest.json".to_string(),
    }
  }
}

/// Which API paths are safe to answer from cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub read_only_prefixes: Vec<String>,
  /// Case-sensitive substrings that mark a path as a mutation
  pub mutation_markers: Vec<String>,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      read_only_prefixes: strings(&[
        "/api/books",
        "/api/reservations",
        "/api/notifications",
        "/api/users/profile",
        "/api/statistics",
      ]),
      mutation_markers: strings(&[
        "/create", "/update", "/delete", "/cancel", "/approve", "/reject", "/return",
      ]),
    }
  }
}

impl ApiConfig {
  /// A path is read-only when it sits under an allow-listed prefix and
  /// carries no mutation marker.
  pub fn is_read_only(&self, path: &str) -> bool {
    self
      .read_only_prefixes
      .iter()
      .any(|prefix| path.starts_with(prefix.as_str()))
      && !self
        .mutation_markers
        .iter()
        .any(|marker| path.contains(marker.as_str()))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
  /// Page served to navigations that fail with nothing cached
  pub offline_page: String,
}

impl Default for FallbackConfig {
  fn default() -> Self {
    Self {
      offline_page: "/offline.html".to_string(),
    }
  }
}

/// Where a pending action of a given kind is replayed.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
  pub method: String,
  pub path: String,
}

impl Endpoint {
  fn post(path: &str) -> Self {
    Self {
      method: "POST".to_string(),
      path: path.to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Failed replays before an action leaves the outbox
  pub max_attempts: u32,
  /// Action kind -> replay endpoint
  pub endpoints: BTreeMap<String, Endpoint>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    let endpoints = [
      ("reservation.create", Endpoint::post("/api/reservations")),
      ("reservation.cancel", Endpoint::post("/api/reservations/cancel")),
      ("borrowing.renew", Endpoint::post("/api/borrowings/renew")),
      ("notification.read", Endpoint::post("/api/notifications/read")),
    ]
    .into_iter()
    .map(|(kind, endpoint)| (kind.to_string(), endpoint))
    .collect();

    Self {
      max_attempts: 3,
      endpoints,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  /// Opened when the "view" action is clicked
  pub dashboard_url: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Library System".to_string(),
      default_body: "You have a new notification from the library".to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/icon-72x72.png".to_string(),
      dashboard_url: "/dashboard".to_string(),
    }
  }
}

/// Upper bound for `storage.query_freshness_hours`, one century.
pub const MAX_QUERY_FRESHNESS_HOURS: i64 = 24 * 365 * 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Named-cache database (default: data dir)
  pub cache_path: Option<PathBuf>,
  /// Outbox/snapshot database (default: data dir)
  pub offline_path: Option<PathBuf>,
  /// Freshness window for cached query results
  pub query_freshness_hours: i64,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      cache_path: None,
      offline_path: None,
      query_freshness_hours: 24,
    }
  }
}

/// The four cache names for one version tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
  pub static_assets: String,
  pub dynamic: String,
  pub api: String,
  pub images: String,
}

impl CacheNames {
  pub fn for_version(version: &str) -> Self {
    Self {
      static_assets: format!("static-{}", version),
      dynamic: format!("dynamic-{}", version),
      api: format!("api-{}", version),
      images: format!("images-{}", version),
    }
  }

  /// Names that survive activation.
  pub fn all(&self) -> [&str; 4] {
    [
      &self.static_assets,
      &self.dynamic,
      &self.api,
      &self.images,
    ]
  }

  pub fn contains(&self, name: &str) -> bool {
    self.all().contains(&name)
  }
}

impl Config {
  /// Defaults for the given origin.
  pub fn for_origin(origin: &str) -> Result<Self> {
    let origin = Url::parse(origin).map_err(|e| eyre!("Invalid origin '{}': {}", origin, e))?;
    let config = Self {
      origin,
      version: default_version(),
      manifests: ManifestConfig::default(),
      routing: RoutingConfig::default(),
      api: ApiConfig::default(),
      fallback: FallbackConfig::default(),
      sync: SyncConfig::default(),
      notifications: NotificationConfig::default(),
      storage: StorageConfig::default(),
      request_timeout_secs: None,
    };
    config.validate()?;
    Ok(config)
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shelfsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shelfsync/config.yaml
  ///
  /// With no file found, falls back to defaults for `origin` if one was
  /// given on the command line. A given `origin` also overrides the file.
  pub fn load(explicit_path: Option<&Path>, origin: Option<&str>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match (path, origin) {
      (Some(p), origin) => {
        let mut config = Self::load_from_path(&p)?;
        if let Some(origin) = origin {
          config.origin =
            Url::parse(origin).map_err(|e| eyre!("Invalid origin '{}': {}", origin, e))?;
        }
        config.validate()?;
        Ok(config)
      }
      (None, Some(origin)) => Self::for_origin(origin),
      (None, None) => Err(eyre!(
        "No configuration file found. Create one at ~/.config/shelfsync/config.yaml\n\
                 or pass --origin."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("shelfsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shelfsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Invalid configuration: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.version.trim().is_empty() {
      return Err(eyre!("version must not be empty"));
    }
    if self.sync.max_attempts == 0 {
      return Err(eyre!("sync.max_attempts must be at least 1"));
    }
    if !self.routing.api_prefix.starts_with('/') {
      return Err(eyre!(
        "routing.api_prefix must start with '/': {}",
        self.routing.api_prefix
      ));
    }
    if self.storage.query_freshness_hours <= 0 {
      return Err(eyre!("storage.query_freshness_hours must be positive"));
    }
    if self.storage.query_freshness_hours > MAX_QUERY_FRESHNESS_HOURS {
      return Err(eyre!(
        "storage.query_freshness_hours must be at most {}: {}",
        MAX_QUERY_FRESHNESS_HOURS,
        self.storage.query_freshness_hours
      ));
    }
    Ok(())
  }

  pub fn cache_names(&self) -> CacheNames {
    CacheNames::for_version(&self.version)
  }

  /// Resolve an app-relative path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Cannot resolve '{}' against {}: {}", path, self.origin, e))
  }

  /// Default directory for both databases and the log file.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shelfsync"))
  }

  pub fn cache_db_path(&self) -> Result<PathBuf> {
    match &self.storage.cache_path {
      Some(p) => Ok(p.clone()),
      None => Ok(Self::data_dir()?.join("caches.db")),
    }
  }

  pub fn offline_db_path(&self) -> Result<PathBuf> {
    match &self.storage.offline_path {
      Some(p) => Ok(p.clone()),
      None => Ok(Self::data_dir()?.join("offline.db")),
    }
  }
}

fn strings(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}
