//! The two retrieval policies.
//!
//! Static assets are cache-first (availability over freshness), API
//! responses are network-first (freshness over availability) with a cached
//! fallback and a small canned allow-list behind that.

mod api;
pub mod canned;
mod static_assets;

pub use api::{ApiPolicy, SERVED_BY_HEADER, SERVED_BY_VALUE};
pub use static_assets::StaticAssetPolicy;
