//! Assigns each intercepted request to exactly one strategy.

use reqwest::Method;

use crate::config::Config;
use crate::http::{Destination, Request, RequestMode};

/// Strategy bucket for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not intercepted: non-GET or cross-origin
  Bypass,
  /// Full-page load, network-first with offline page
  Navigation,
  /// API call, network-first with JSON error fallback
  Api,
  /// Image, cache-first with placeholder
  Image,
  /// Build output, scripts, styles, fonts, manifest; cache-first
  Static,
  /// Everything else, network-first
  Dynamic,
}

impl std::fmt::Display for Route {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Route::Bypass => write!(f, "bypass"),
      Route::Navigation => write!(f, "navigation"),
      Route::Api => write!(f, "api"),
      Route::Image => write!(f, "image"),
      Route::Static => write!(f, "static"),
      Route::Dynamic => write!(f, "dynamic"),
    }
  }
}

/// Classify a request. Rules are checked in order and the first match wins.
pub fn classify(request: &Request, config: &Config) -> Route {
  if request.method != Method::GET {
    return Route::Bypass;
  }

  if request.url.origin() != config.origin.origin() {
    return Route::Bypass;
  }

  if request.mode == RequestMode::Navigate {
    return Route::Navigation;
  }

  let path = request.path();
  let routing = &config.routing;

  if path.starts_with(routing.api_prefix.as_str()) {
    return Route::Api;
  }

  if request.destination == Destination::Image {
    return Route::Image;
  }

  if is_static_asset(path, config) {
    return Route::Static;
  }

  Route::Dynamic
}

fn is_static_asset(path: &str, config: &Config) -> bool {
  let routing = &config.routing;

  path == routing.manifest_path
    || routing
      .static_prefixes
      .iter()
      .any(|prefix| path.starts_with(prefix.as_str()))
    || routing
      .static_extensions
      .iter()
      .any(|ext| path.ends_with(ext.as_str()))
}
