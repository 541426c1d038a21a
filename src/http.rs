//! Request/response model shared by the policies, the stores and the queue.
//!
//! Responses are plain serde values so a cache store can persist them
//! verbatim and hand back byte-identical bodies later.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// HTTP methods the worker routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn parse(s: &str) -> Result<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Self::Get),
      "HEAD" => Ok(Self::Head),
      "POST" => Ok(Self::Post),
      "PUT" => Ok(Self::Put),
      "PATCH" => Ok(Self::Patch),
      "DELETE" => Ok(Self::Delete),
      other => Err(eyre!("Unsupported HTTP method: {}", other)),
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Head => "HEAD",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Patch => "PATCH",
      Self::Delete => "DELETE",
    }
  }

  /// Mutating methods are never cached and are the ones the deferred
  /// queue records when the network is down.
  pub fn is_mutating(&self) -> bool {
    !matches!(self, Self::Get | Self::Head)
  }
}

/// What kind of resource a request is for, in the service-worker sense.
///
/// Derived from the URL path since we have no browser to tell us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
  Document,
  Script,
  Style,
  Image,
  Other,
}

impl Destination {
  pub fn from_path(path: &str) -> Self {
    if path.ends_with('/') {
      return Self::Document;
    }

    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
      None => Self::Document,
      Some((_, ext)) => match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => Self::Document,
        "js" | "mjs" => Self::Script,
        "css" => Self::Style,
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "ico" | "avif" => Self::Image,
        _ => Self::Other,
      },
    }
  }

  /// Destinations handled by the static-asset policy.
  pub fn is_static_asset(&self) -> bool {
    !matches!(self, Self::Other)
  }
}

/// An outgoing request as seen by the worker.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  /// Header names are stored lowercased.
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
  pub destination: Destination,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    let destination = Destination::from_path(url.path());
    Self {
      method,
      url,
      headers: BTreeMap::new(),
      body: None,
      destination,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::Get, url)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn with_body(mut self, body: Vec<u8>) -> Self {
    self.body = Some(body);
    self
  }

  /// Cache key: path plus query. Host is implied by the configured origin,
  /// and only GET responses are ever stored under this key.
  pub fn cache_key(&self) -> String {
    match self.url.query() {
      Some(q) => format!("{}?{}", self.url.path(), q),
      None => self.url.path().to_string(),
    }
  }
}

/// A response, either fresh from the network or replayed from a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  /// Header names are stored lowercased.
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: Vec::new(),
    }
  }

  /// Build a JSON response, used for canned fallbacks and queue receipts.
  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    let mut resp = Self::new(status).with_header("content-type", "application/json");
    resp.body = value.to_string().into_bytes();
    resp
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn with_body(mut self, body: Vec<u8>) -> Self {
    self.body = body;
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}
