//! Network seam used by every strategy and by outbox replay.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderName, HeaderValue};
use std::time::Duration;
use thiserror::Error;

use crate::http::{Request, Response};

/// Failure to obtain any response from the network.
///
/// A response with an error status is not a `NetworkError`; it is returned
/// as a normal `Response`.
#[derive(Debug, Error)]
pub enum NetworkError {
  #[error("network unreachable for {url}: {reason}")]
  Unreachable { url: String, reason: String },

  #[error("invalid request for {url}: {reason}")]
  InvalidRequest { url: String, reason: String },

  #[error("failed to read response body from {url}: {reason}")]
  Body { url: String, reason: String },
}

/// Anything that can turn a request into a response over the wire.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> std::result::Result<Response, NetworkError>;
}

/// `reqwest`-backed network.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  /// Build a client. No timeout is imposed unless one is given.
  pub fn new(timeout: Option<Duration>) -> Result<Self> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> std::result::Result<Response, NetworkError> {
    let url = request.url.to_string();

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
        NetworkError::InvalidRequest {
          url: url.clone(),
          reason: e.to_string(),
        }
      })?;
      let value = HeaderValue::from_str(value).map_err(|e| NetworkError::InvalidRequest {
        url: url.clone(),
        reason: e.to_string(),
      })?;
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| NetworkError::Unreachable {
        url: url.clone(),
        reason: e.to_string(),
      })?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| {
        v.to_str()
          .ok()
          .map(|v| (k.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await.map_err(|e| NetworkError::Body {
      url: url.clone(),
      reason: e.to_string(),
    })?;

    Ok(Response {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}
