//! Named cache stores over an embedded blob store.
//!
//! Two stores exist at any time, one for static assets and one for API
//! responses. Store names carry the deploy version token; bumping the token
//! and sweeping on activation is the only cache-invalidation mechanism.

mod backend;
mod registry;

pub use backend::{CachedResponse, SqliteStore, StoreBackend};
pub use registry::{CacheRegistry, StoreHandle};
