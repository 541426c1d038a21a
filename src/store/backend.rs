//! Store backend trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::http::Response;

/// A response read back from a store, with the time it was written.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache store backends.
///
/// A backend holds any number of named stores, each a mapping from request
/// key to the most recently stored response. All methods are synchronous;
/// callers hold no locks of their own.
pub trait StoreBackend: Send + Sync {
  /// Create a store if it does not exist yet.
  fn create_store(&self, name: &str) -> Result<()>;

  /// Names of all stores currently present.
  fn list_stores(&self) -> Result<Vec<String>>;

  /// Delete a store and everything in it.
  fn delete_store(&self, name: &str) -> Result<()>;

  /// Look up a response by request key.
  fn get(&self, store: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Store a response under a request key, replacing any previous entry.
  fn put(&self, store: &str, key: &str, response: &Response) -> Result<()>;

  /// Number of entries in a store.
  fn count(&self, store: &str) -> Result<u64>;

  /// Delete the oldest entries beyond `max_entries`. Returns how many were
  /// removed.
  fn prune(&self, store: &str, max_entries: u64) -> Result<u64>;
}

/// SQLite-backed store implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the store at an explicit path.
  pub fn open_at(path: &std::path::Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// In-memory store, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offramp").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the store tables.
const STORE_SCHEMA: &str = r#"
-- Named stores; names carry the deploy version token
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per cached response (serialized JSON)
CREATE TABLE IF NOT EXISTS cache_entries (
    store TEXT NOT NULL,
    request_key TEXT NOT NULL,
    response BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_age
    ON cache_entries(store, cached_at);
"#;

impl StoreBackend for SqliteStore {
  fn create_store(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create store {}: {}", name, e))?;

    Ok(())
  }

  fn list_stores(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare store listing: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM cache_entries WHERE store = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of store {}: {}", name, e))?;
    conn
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete store {}: {}", name, e))?;

    Ok(())
  }

  fn get(&self, store: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT response, cached_at FROM cache_entries
         WHERE store = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare entry lookup: {}", e))?;

    let result: Option<(Vec<u8>, String)> = stmt
      .query_row(params![store, key], |row| Ok((row.get(0)?, row.get(1)?)))
      .ok();

    match result {
      Some((data, cached_at_str)) => {
        let response: Response = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize cached response: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedResponse {
          response,
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, store: &str, key: &str, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data =
      serde_json::to_vec(response).map_err(|e| eyre!("Failed to serialize response: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (store, request_key, response, cached_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![store, key, data],
      )
      .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;

    Ok(())
  }

  fn count(&self, store: &str) -> Result<u64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: u64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE store = ?",
        params![store],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries in {}: {}", store, e))?;

    Ok(count)
  }

  fn prune(&self, store: &str, max_entries: u64) -> Result<u64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Keep the newest max_entries rows, delete the rest. Ties on cached_at
    // break by key so the result is deterministic.
    let removed = conn
      .execute(
        "DELETE FROM cache_entries
         WHERE store = ?1 AND request_key IN (
           SELECT request_key FROM cache_entries
           WHERE store = ?1
           ORDER BY cached_at DESC, request_key DESC
           LIMIT -1 OFFSET ?2
         )",
        params![store, max_entries],
      )
      .map_err(|e| eyre!("Failed to prune store {}: {}", store, e))?;

    Ok(removed as u64)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
