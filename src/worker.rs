//! The worker lifecycle dispatcher.
//!
//! One stateless object owns the registry, the two policies and the queue,
//! and exposes the four lifecycle handlers: install, activate, fetch, sync.
//! Everything is injected; there are no ambient globals.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use tracing::{info, warn};
use url::Url;

use crate::config::Config;
use crate::http::{Request, Response};
use crate::net::Network;
use crate::policy::{ApiPolicy, StaticAssetPolicy};
use crate::queue::{drain, DrainReport, DurableQueue};
use crate::store::{CacheRegistry, StoreBackend};

/// Snapshot of store and queue state for the status command.
#[derive(Debug, Clone, Copy)]
pub struct WorkerStatus {
  pub static_entries: u64,
  pub api_entries: u64,
  pub pending_actions: u64,
  pub abandoned_actions: u64,
}

pub struct Worker<N: Network, S: StoreBackend, Q: DurableQueue> {
  net: N,
  registry: CacheRegistry<S>,
  statics: StaticAssetPolicy<S>,
  api: ApiPolicy<S>,
  queue: Q,
  origin: Url,
  api_prefix: String,
  manifest: Vec<String>,
  max_attempts: u32,
  lease_ttl: chrono::Duration,
}

impl<N: Network, S: StoreBackend, Q: DurableQueue> Worker<N, S, Q> {
  pub fn new(config: &Config, net: N, backend: S, queue: Q) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid origin {}: {}", config.origin, e))?;

    let registry = CacheRegistry::new(backend, &config.cache.version);
    registry.ensure_stores()?;

    let statics = StaticAssetPolicy::new(
      registry.static_store(),
      config.shell.document.clone(),
      config.cache.static_max_entries,
    );
    let api = ApiPolicy::new(registry.api_store(), config.cache.api_max_entries);

    Ok(Self {
      net,
      registry,
      statics,
      api,
      queue,
      origin,
      api_prefix: config.api_prefix.clone(),
      manifest: config.shell.manifest.clone(),
      max_attempts: config.queue.max_attempts,
      lease_ttl: chrono::Duration::seconds(config.queue.lease_ttl_secs),
    })
  }

  /// Resolve a path against the configured origin.
  pub fn request_url(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid request path {}: {}", path, e))
  }

  /// Install: create both stores and prime the static store with the shell
  /// manifest. Any manifest fetch failure fails the install.
  pub async fn on_install(&self) -> Result<()> {
    self.registry.ensure_stores()?;

    let mut reqs = Vec::with_capacity(self.manifest.len());
    for path in &self.manifest {
      reqs.push(Request::get(self.request_url(path)?));
    }

    // Manifest assets are fetched concurrently; any failure fails install.
    let fetches = reqs.iter().map(|req| async move {
      let resp = self
        .net
        .fetch(req)
        .await
        .map_err(|e| eyre!("Install failed fetching {}: {}", req.cache_key(), e))?;

      if !resp.is_success() {
        return Err(eyre!(
          "Install failed fetching {}: HTTP {}",
          req.cache_key(),
          resp.status
        ));
      }

      Ok::<_, color_eyre::Report>(resp)
    });

    for (req, resp) in reqs.iter().zip(try_join_all(fetches).await?) {
      self.statics.precache(&req.cache_key(), &resp)?;
    }

    info!(assets = self.manifest.len(), "installed, shell manifest cached");
    Ok(())
  }

  /// Activate: sweep stores from older version tokens. Takes effect for all
  /// clients immediately.
  pub async fn on_activate(&self) -> Result<()> {
    self.registry.sweep_stale()?;
    info!("activated");
    Ok(())
  }

  /// Fetch: route a request to the right policy.
  pub async fn on_fetch(&self, req: &Request) -> Result<Response> {
    if req.method.is_mutating() {
      return self.passthrough_mutating(req).await;
    }

    if req.url.path().starts_with(&self.api_prefix) {
      return self.api.handle(&self.net, req).await;
    }

    if req.destination.is_static_asset() {
      return self.statics.handle(&self.net, req).await;
    }

    self
      .net
      .fetch(req)
      .await
      .map_err(|e| eyre!("Fetch failed for {}: {}", req.cache_key(), e))
  }

  /// Sync: drain the deferred action queue.
  pub async fn on_sync(&self) -> Result<DrainReport> {
    drain(&self.net, &self.queue, self.max_attempts, self.lease_ttl).await
  }

  pub fn status(&self) -> Result<WorkerStatus> {
    Ok(WorkerStatus {
      static_entries: self.registry.static_store().count()?,
      api_entries: self.registry.api_store().count()?,
      pending_actions: self.queue.pending_count()?,
      abandoned_actions: self.queue.abandoned_count()?,
    })
  }

  /// Mutating requests are never cached: pass them through, and if the
  /// network is down record them for replay and acknowledge with an
  /// explicit offline receipt.
  async fn passthrough_mutating(&self, req: &Request) -> Result<Response> {
    match self.net.fetch(req).await {
      Ok(resp) => Ok(resp),
      Err(net_err) => {
        warn!(key = %req.cache_key(), error = %net_err, "mutating request failed, deferring");
        let id = self.queue.enqueue(req)?;
        info!(id, "deferred action queued for replay");
        Ok(Response::json(
          202,
          &serde_json::json!({"queued": true, "offline": true}),
        ))
      }
    }
  }
}
