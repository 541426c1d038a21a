//! Network-first policy for API requests.

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, warn};

use super::canned;
use crate::http::{Method, Request, Response};
use crate::net::Network;
use crate::store::{StoreBackend, StoreHandle};

/// Marker header added to responses served from the api store during a
/// network failure, so callers can tell stale data from fresh.
pub const SERVED_BY_HEADER: &str = "x-served-by";
pub const SERVED_BY_VALUE: &str = "offramp-cache";

/// Serves API requests network-first. Resume and profile data changes
/// often, so freshness wins whenever the network is reachable.
pub struct ApiPolicy<S: StoreBackend> {
  store: StoreHandle<S>,
  max_entries: u64,
}

impl<S: StoreBackend> ApiPolicy<S> {
  pub fn new(store: StoreHandle<S>, max_entries: u64) -> Self {
    Self { store, max_entries }
  }

  /// Handle an API request.
  ///
  /// 1. Network first; successful 2xx GET responses are persisted, and the
  ///    network response is returned unmodified in every success case.
  /// 2. On transport failure: cached entry (with the marker header), then
  ///    canned payload, then the original failure.
  pub async fn handle<N: Network>(&self, net: &N, req: &Request) -> Result<Response> {
    let key = req.cache_key();

    match net.fetch(req).await {
      Ok(resp) => {
        if req.method == Method::Get && resp.is_success() {
          if let Err(e) = self.cache(&key, &resp) {
            warn!(key = %key, error = %e, "failed to cache api response");
          }
        }
        Ok(resp)
      }
      Err(net_err) => {
        if req.method == Method::Get {
          match self.store.get(&key) {
            Ok(Some(cached)) => {
              debug!(key = %key, cached_at = %cached.cached_at, "offline, serving cached api response");
              return Ok(
                cached
                  .response
                  .with_header(SERVED_BY_HEADER, SERVED_BY_VALUE),
              );
            }
            Ok(None) => {}
            Err(e) => {
              warn!(key = %key, error = %e, "api store lookup failed");
            }
          }

          if let Some(payload) = canned::lookup(req.url.path()) {
            debug!(key = %key, "offline, serving canned api response");
            return Ok(Response::json(200, &payload));
          }
        }

        Err(eyre!("API fetch failed for {}: {}", key, net_err))
      }
    }
  }

  fn cache(&self, key: &str, resp: &Response) -> Result<()> {
    self.store.put(key, resp)?;
    self.store.prune(self.max_entries)?;
    Ok(())
  }
}
