//! Cache-first policy for documents, scripts, styles and images.

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, warn};

use crate::http::{Destination, Method, Request, Response};
use crate::net::Network;
use crate::store::{StoreBackend, StoreHandle};

/// Serves static-asset requests cache-first, with the stored shell document
/// as the last resort for failed navigations.
pub struct StaticAssetPolicy<S: StoreBackend> {
  store: StoreHandle<S>,
  /// Request key of the shell document cached at install time.
  shell_key: String,
  /// Entry cap; oldest entries beyond it are pruned after each write.
  max_entries: u64,
}

impl<S: StoreBackend> StaticAssetPolicy<S> {
  pub fn new(store: StoreHandle<S>, shell_key: String, max_entries: u64) -> Self {
    Self {
      store,
      shell_key,
      max_entries,
    }
  }

  /// Handle a static-asset request.
  ///
  /// 1. Cache hit: return the stored response, no network contacted.
  /// 2. Miss: fetch; persist successful GET responses, return the network
  ///    response either way.
  /// 3. Network down: serve the shell document for navigations, otherwise
  ///    propagate the failure.
  ///
  /// Storage failures degrade the request to network-only behavior.
  pub async fn handle<N: Network>(&self, net: &N, req: &Request) -> Result<Response> {
    let key = req.cache_key();

    // Only GET requests match the cache, mirroring the write side.
    if req.method == Method::Get {
      match self.store.get(&key) {
        Ok(Some(cached)) => {
          debug!(key = %key, cached_at = %cached.cached_at, "static cache hit");
          return Ok(cached.response);
        }
        Ok(None) => {}
        Err(e) => {
          warn!(key = %key, error = %e, "static store lookup failed, going to network");
        }
      }
    }

    match net.fetch(req).await {
      Ok(resp) => {
        if req.method == Method::Get && resp.is_success() {
          if let Err(e) = self.cache(&key, &resp) {
            warn!(key = %key, error = %e, "failed to cache static asset");
          }
        }
        Ok(resp)
      }
      Err(net_err) => {
        if req.destination == Destination::Document {
          if let Ok(Some(shell)) = self.store.get(&self.shell_key) {
            debug!(key = %key, "serving shell document for failed navigation");
            return Ok(shell.response);
          }
        }
        Err(eyre!("Static asset fetch failed for {}: {}", key, net_err))
      }
    }
  }

  fn cache(&self, key: &str, resp: &Response) -> Result<()> {
    self.store.put(key, resp)?;
    let removed = self.store.prune(self.max_entries)?;
    if removed > 0 {
      debug!(store = %self.store.name(), removed, "pruned static store to capacity");
    }
    Ok(())
  }

  /// Store an install-time manifest asset under its request key.
  pub fn precache(&self, key: &str, resp: &Response) -> Result<()> {
    self.store.put(key, resp)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::{Method, Request};
  use crate::net::testing::FakeNetwork;
  use crate::net::NetworkError;
  use crate::store::{CacheRegistry, SqliteStore};
  use url::Url;

  fn policy() -> StaticAssetPolicy<SqliteStore> {
    let registry = CacheRegistry::new(SqliteStore::open_in_memory().unwrap(), "v1");
    registry.ensure_stores().unwrap();
    StaticAssetPolicy::new(registry.static_store(), "/index.html".to_string(), 256)
  }

  fn req(path: &str) -> Request {
    Request::get(Url::parse(&format!("https://app.example.com{}", path)).unwrap())
  }

  fn resp(body: &str) -> Response {
    Response::new(200).with_body(body.as_bytes().to_vec())
  }

  #[tokio::test]
  async fn test_cache_hit_never_contacts_network() {
    let policy = policy();
    policy.precache("/static/app.js", &resp("console.log(1)")).unwrap();

    let net = FakeNetwork::new();
    let out = policy.handle(&net, &req("/static/app.js")).await.unwrap();

    assert_eq!(out.body, b"console.log(1)");
    assert_eq!(net.call_count(), 0);
  }

  #[tokio::test]
  async fn test_miss_fetches_and_populates_cache() {
    let policy = policy();
    let net = FakeNetwork::new();
    net.push_response(resp("body { margin: 0 }"));

    let out = policy.handle(&net, &req("/static/main.css")).await.unwrap();
    assert_eq!(out.body, b"body { margin: 0 }");
    assert_eq!(net.call_count(), 1);

    // Second request is served from cache.
    let out = policy.handle(&net, &req("/static/main.css")).await.unwrap();
    assert_eq!(out.body, b"body { margin: 0 }");
    assert_eq!(net.call_count(), 1);
  }

  #[tokio::test]
  async fn test_error_responses_are_not_cached() {
    let policy = policy();
    let net = FakeNetwork::new();
    net.push_response(Response::new(404));
    net.push_response(Response::new(404));

    let out = policy.handle(&net, &req("/static/gone.js")).await.unwrap();
    assert_eq!(out.status, 404);

    // Still a miss: the 404 was returned but never stored.
    let out = policy.handle(&net, &req("/static/gone.js")).await.unwrap();
    assert_eq!(out.status, 404);
    assert_eq!(net.call_count(), 2);
  }

  #[tokio::test]
  async fn test_offline_navigation_falls_back_to_shell() {
    let policy = policy();
    policy.precache("/index.html", &resp("<html>shell</html>")).unwrap();

    let net = FakeNetwork::offline();
    let out = policy.handle(&net, &req("/some/deep/route")).await.unwrap();
    assert_eq!(out.body, b"<html>shell</html>");
  }

  #[tokio::test]
  async fn test_offline_script_miss_propagates_failure() {
    let policy = policy();
    let net = FakeNetwork::new();
    net.push_error(NetworkError::Unreachable("down".to_string()));

    let result = policy.handle(&net, &req("/static/app.js")).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_precached_asset_served_with_network_hard_down() {
    let policy = policy();
    policy.precache("/logo192.png", &resp("png-bytes")).unwrap();

    let net = FakeNetwork::offline();
    let out = policy.handle(&net, &req("/logo192.png")).await.unwrap();
    assert_eq!(out.body, b"png-bytes");
    assert_eq!(net.call_count(), 0);
  }

  #[tokio::test]
  async fn test_head_requests_bypass_the_cache() {
    let policy = policy();
    policy.precache("/static/app.js", &resp("cached body")).unwrap();

    let net = FakeNetwork::new();
    net.push_response(Response::new(200));

    let mut head = req("/static/app.js");
    head.method = Method::Head;

    // The GET-cached entry must not answer a HEAD request.
    let out = policy.handle(&net, &head).await.unwrap();
    assert!(out.body.is_empty());
    assert_eq!(net.call_count(), 1);
  }

  #[tokio::test]
  async fn test_head_responses_are_not_cached() {
    let policy = policy();
    let net = FakeNetwork::new();
    net.push_response(resp(""));
    net.push_response(resp(""));

    let mut head = req("/static/app.js");
    head.method = Method::Head;

    policy.handle(&net, &head).await.unwrap();
    policy.handle(&net, &head).await.unwrap();
    assert_eq!(net.call_count(), 2);
  }
}
