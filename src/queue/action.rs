//! Deferred action record and its replay request.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

use crate::http::{Method, Request};

/// Header carrying the idempotency key on every replay attempt.
pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

/// A mutating request recorded while offline.
#[derive(Debug, Clone)]
pub struct DeferredAction {
  pub id: i64,
  pub url: String,
  pub method: Method,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
  pub enqueued_at: DateTime<Utc>,
  pub attempts: u32,
  /// Stable across retries of this entry, so the server can deduplicate
  /// at-least-once delivery.
  pub idempotency_key: String,
}

impl DeferredAction {
  /// Rebuild the request for replay, with the idempotency key attached.
  pub fn to_request(&self) -> Result<Request> {
    let url = Url::parse(&self.url)
      .map_err(|e| eyre!("Queued action {} has an invalid URL {}: {}", self.id, self.url, e))?;

    let mut req = Request::new(self.method, url);
    req.headers = self.headers.clone();
    req.body = self.body.clone();
    Ok(req.with_header(IDEMPOTENCY_HEADER, &self.idempotency_key))
  }
}

/// Derive an idempotency key for a request enqueued now.
pub fn idempotency_key(method: Method, url: &Url, enqueued_at: DateTime<Utc>) -> String {
  let mut hasher = Sha256::new();
  hasher.update(method.as_str().as_bytes());
  hasher.update(b"|");
  hasher.update(url.as_str().as_bytes());
  hasher.update(b"|");
  hasher.update(
    enqueued_at
      .timestamp_nanos_opt()
      .unwrap_or_default()
      .to_le_bytes(),
  );
  hex::encode(hasher.finalize())
}
