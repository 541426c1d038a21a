//! Network layer: the fetch seam the policies and the queue replay against.
//!
//! Transport failures (offline, DNS, refused, timed out) are errors; HTTP
//! error statuses are not: they come back as a regular [`Response`] so the
//! policies can decide whether to cache them.

use crate::http::{Method, Request, Response};
use std::collections::BTreeMap;
use std::time::Duration;

/// A transport-level fetch failure. This is the "offline" signal the
/// fallback paths key off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
  /// Connection could not be established or broke mid-flight.
  Unreachable(String),
  /// The bounded request timeout elapsed.
  Timeout,
}

impl std::fmt::Display for NetworkError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Unreachable(msg) => write!(f, "network unreachable: {}", msg),
      Self::Timeout => write!(f, "network request timed out"),
    }
  }
}

impl std::error::Error for NetworkError {}

/// Trait for performing network fetches.
pub trait Network: Send + Sync {
  fn fetch(
    &self,
    req: &Request,
  ) -> impl std::future::Future<Output = Result<Response, NetworkError>> + Send;
}

/// reqwest-backed network with a bounded per-request timeout, so a stalled
/// connection degrades to the cache fallback instead of hanging the request.
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(timeout: Duration) -> color_eyre::Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, req: &Request) -> Result<Response, NetworkError> {
    let method = match req.method {
      Method::Get => reqwest::Method::GET,
      Method::Head => reqwest::Method::HEAD,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    };

    let mut builder = self.client.request(method, req.url.clone());
    for (name, value) in &req.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = &req.body {
      builder = builder.body(body.clone());
    }

    let resp = builder.send().await.map_err(|e| {
      if e.is_timeout() {
        NetworkError::Timeout
      } else {
        NetworkError::Unreachable(e.to_string())
      }
    })?;

    let status = resp.status().as_u16();
    let mut headers = BTreeMap::new();
    for (name, value) in resp.headers() {
      if let Ok(v) = value.to_str() {
        headers.insert(name.as_str().to_string(), v.to_string());
      }
    }

    let body = resp
      .bytes()
      .await
      .map_err(|e| NetworkError::Unreachable(e.to_string()))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}
