//! Fetch strategies: how a routed request is answered from network and cache.
//!
//! Every strategy only caches 2xx responses. A non-2xx network response is a
//! real answer and is passed through untouched. Lookups search all caches,
//! oldest first. Writes are best-effort: a failed cache write is logged and
//! the network response is still returned.

use color_eyre::Result;
use serde_json::json;
use tracing::{debug, warn};

use crate::cache::{CacheResult, CacheStorage};
use crate::config::{CacheNames, Config};
use crate::http::{Request, Response};
use crate::network::Network;

/// Inline placeholder served when an image cannot be fetched.
pub const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200"><rect width="200" height="200" fill="#f3f4f6"/><text x="100" y="100" font-family="sans-serif" font-size="14" fill="#9ca3af" text-anchor="middle" dominant-baseline="middle">Image unavailable</text></svg>"##;

/// Page served to a navigation when neither network nor any cache answers,
/// including the configured offline page.
const OFFLINE_HTML: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Offline</title></head><body><h1>You are offline</h1><p>Reconnect to continue using the library system.</p></body></html>";

/// Everything a strategy touches.
#[derive(Clone, Copy)]
pub struct FetchContext<'a> {
  pub storage: &'a dyn CacheStorage,
  pub network: &'a dyn Network,
  pub config: &'a Config,
  pub names: &'a CacheNames,
}

/// What network-first does when the network fails and no cache has the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMiss {
  /// Serve the offline page (navigations)
  OfflinePage,
  /// Return the network error to the caller
  Propagate,
}

impl FetchContext<'_> {
  fn store(&self, cache: &str, key: &str, response: &Response) {
    if let Err(e) = self.storage.put(cache, key, response) {
      warn!(cache, key, error = %e, "Failed to cache response");
    }
  }

  /// The cached offline page, or a built-in one if install never stored it.
  fn offline_page(&self) -> Result<Response> {
    let url = self.config.resolve(&self.config.fallback.offline_page)?;
    if let Some(page) = self.storage.lookup_any(url.as_str())? {
      return Ok(page);
    }
    warn!(url = %url, "Offline page is not cached, serving built-in page");
    Ok(
      Response::new(503, OFFLINE_HTML)
        .with_header("Content-Type", "text/html; charset=utf-8")
        .with_header("Cache-Control", "no-store"),
    )
  }
}

/// Network first, falling back to any cache (navigations and dynamic pages).
///
/// Successful responses are written to the dynamic cache.
pub async fn network_first(
  ctx: FetchContext<'_>,
  request: &Request,
  on_miss: OnMiss,
) -> Result<CacheResult<Response>> {
  let key = request.cache_key();

  match ctx.network.fetch(request).await {
    Ok(response) => {
      if response.is_success() {
        ctx.store(&ctx.names.dynamic, &key, &response);
      }
      Ok(CacheResult::from_network(response))
    }
    Err(err) => {
      debug!(key = %key, error = %err, "Network failed, trying caches");

      if let Some(cached) = ctx.storage.lookup_any(&key)? {
        return Ok(CacheResult::from_cache(cached));
      }

      match on_miss {
        OnMiss::OfflinePage => Ok(CacheResult::fallback(ctx.offline_page()?)),
        OnMiss::Propagate => Err(err.into()),
      }
    }
  }
}

/// Network first for API calls, with a JSON error when offline.
///
/// Only read-only paths are written to or answered from the API cache.
pub async fn network_first_json(
  ctx: FetchContext<'_>,
  request: &Request,
) -> Result<CacheResult<Response>> {
  let key = request.cache_key();
  let read_only = ctx.config.api.is_read_only(request.path());

  match ctx.network.fetch(request).await {
    Ok(response) => {
      if read_only && response.is_success() {
        ctx.store(&ctx.names.api, &key, &response);
      }
      Ok(CacheResult::from_network(response))
    }
    Err(err) => {
      debug!(key = %key, read_only, error = %err, "API request failed");

      if read_only {
        if let Some(cached) = ctx.storage.lookup_any(&key)? {
          return Ok(CacheResult::from_cache(cached));
        }
      }

      Ok(CacheResult::fallback(offline_json()?))
    }
  }
}

/// Cache first, then network (static assets). Network failure on a miss is
/// returned to the caller.
pub async fn cache_first(ctx: FetchContext<'_>, request: &Request) -> Result<CacheResult<Response>> {
  let key = request.cache_key();

  if let Some(cached) = ctx.storage.lookup_any(&key)? {
    return Ok(CacheResult::from_cache(cached));
  }

  let response = ctx.network.fetch(request).await?;
  if response.is_success() {
    ctx.store(&ctx.names.static_assets, &key, &response);
  }
  Ok(CacheResult::from_network(response))
}

/// Cache first, then network, then a placeholder graphic (images).
pub async fn cache_first_with_placeholder(
  ctx: FetchContext<'_>,
  request: &Request,
) -> Result<CacheResult<Response>> {
  let key = request.cache_key();

  if let Some(cached) = ctx.storage.lookup_any(&key)? {
    return Ok(CacheResult::from_cache(cached));
  }

  match ctx.network.fetch(request).await {
    Ok(response) => {
      if response.is_success() {
        ctx.store(&ctx.names.images, &key, &response);
      }
      Ok(CacheResult::from_network(response))
    }
    Err(err) => {
      debug!(key = %key, error = %err, "Image unavailable, serving placeholder");
      Ok(CacheResult::fallback(placeholder_image()))
    }
  }
}

/// 503 body telling callers the failure is connectivity, not the service.
pub fn offline_json() -> Result<Response> {
  let body = json!({
    "error": "Network unavailable",
    "offline": true,
    "message": "You are offline. This data will be available again once you reconnect.",
  });
  Ok(Response::json(503, &body)?.with_header("Cache-Control", "no-store"))
}

pub fn placeholder_image() -> Response {
  Response::new(200, PLACEHOLDER_SVG)
    .with_header("Content-Type", "image/svg+xml")
    .with_header("Cache-Control", "no-cache")
}
