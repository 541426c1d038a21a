//! Cache registry: owns the two named stores and their lifecycle.

use color_eyre::Result;
use std::sync::Arc;
use tracing::info;

use super::backend::{CachedResponse, StoreBackend};
use crate::http::Response;

/// A handle to one named store, handed out by the registry. Policies only
/// ever touch stores through one of these.
pub struct StoreHandle<S: StoreBackend> {
  backend: Arc<S>,
  name: String,
}

impl<S: StoreBackend> StoreHandle<S> {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn get(&self, key: &str) -> Result<Option<CachedResponse>> {
    self.backend.get(&self.name, key)
  }

  pub fn put(&self, key: &str, response: &Response) -> Result<()> {
    self.backend.put(&self.name, key, response)
  }

  pub fn count(&self) -> Result<u64> {
    self.backend.count(&self.name)
  }

  pub fn prune(&self, max_entries: u64) -> Result<u64> {
    self.backend.prune(&self.name, max_entries)
  }
}

impl<S: StoreBackend> Clone for StoreHandle<S> {
  fn clone(&self) -> Self {
    Self {
      backend: Arc::clone(&self.backend),
      name: self.name.clone(),
    }
  }
}

/// Owns the static and api stores for the current version token and sweeps
/// out every other generation on activation.
pub struct CacheRegistry<S: StoreBackend> {
  backend: Arc<S>,
  static_name: String,
  api_name: String,
}

impl<S: StoreBackend> CacheRegistry<S> {
  pub fn new(backend: S, version: &str) -> Self {
    Self {
      backend: Arc::new(backend),
      static_name: format!("static-{}", version),
      api_name: format!("api-{}", version),
    }
  }

  /// Create both stores if absent. Called at install time; also safe to
  /// call on every startup.
  pub fn ensure_stores(&self) -> Result<()> {
    self.backend.create_store(&self.static_name)?;
    self.backend.create_store(&self.api_name)?;
    Ok(())
  }

  /// Delete every store whose name is not one of the two current ones.
  /// This is the version-bump eviction run on activation.
  pub fn sweep_stale(&self) -> Result<()> {
    for name in self.backend.list_stores()? {
      if name != self.static_name && name != self.api_name {
        info!(store = %name, "deleting stale cache store");
        self.backend.delete_store(&name)?;
      }
    }
    Ok(())
  }

  pub fn static_store(&self) -> StoreHandle<S> {
    StoreHandle {
      backend: Arc::clone(&self.backend),
      name: self.static_name.clone(),
    }
  }

  pub fn api_store(&self) -> StoreHandle<S> {
    StoreHandle {
      backend: Arc::clone(&self.backend),
      name: self.api_name.clone(),
    }
  }
}
