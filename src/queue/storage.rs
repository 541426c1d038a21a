//! Durable queue trait and SQLite implementation.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::sync::Mutex;

use super::action::{idempotency_key, DeferredAction};
use crate::http::{Method, Request};

/// Trait for durable deferred-action queues.
///
/// Entries are only ever removed by successful replay or explicit
/// abandonment; nothing is dropped silently.
pub trait DurableQueue: Send + Sync {
  /// Record a mutating request that failed due to connectivity. Returns the
  /// queue id of the new entry.
  fn enqueue(&self, req: &Request) -> Result<i64>;

  /// All pending entries in insertion order, abandoned ones excluded.
  fn peek_all(&self) -> Result<Vec<DeferredAction>>;

  /// Remove an entry after successful replay.
  fn remove(&self, id: i64) -> Result<()>;

  /// Record a failed replay attempt. Returns the new attempt count.
  fn record_attempt(&self, id: i64) -> Result<u32>;

  /// Mark an entry abandoned: skipped by drains, kept for inspection.
  fn mark_abandoned(&self, id: i64) -> Result<()>;

  /// Number of pending entries.
  fn pending_count(&self) -> Result<u64>;

  /// Number of abandoned entries.
  fn abandoned_count(&self) -> Result<u64>;

  /// Take the drain lease if it is free or expired. Only one replay pass
  /// may run at a time across tabs/processes.
  fn try_acquire_lease(&self, ttl: chrono::Duration) -> Result<bool>;

  /// Release the drain lease.
  fn release_lease(&self) -> Result<()>;
}

/// SQLite-backed durable queue.
pub struct SqliteQueue {
  conn: Mutex<Connection>,
}

impl SqliteQueue {
  /// Open (or create) the queue at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the queue at an explicit path.
  pub fn open_at(path: &std::path::Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    let queue = Self {
      conn: Mutex::new(conn),
    };
    queue.run_migrations()?;

    Ok(queue)
  }

  /// In-memory queue, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory queue: {}", e))?;

    let queue = Self {
      conn: Mutex::new(conn),
    };
    queue.run_migrations()?;

    Ok(queue)
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offramp").join("queue.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the queue tables.
const QUEUE_SCHEMA: &str = r#"
-- Mutating requests recorded while offline, replayed FIFO
CREATE TABLE IF NOT EXISTS deferred_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    idempotency_key TEXT NOT NULL,
    enqueued_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    abandoned INTEGER NOT NULL DEFAULT 0
);

-- Single-row lease guarding the replay pass
CREATE TABLE IF NOT EXISTS drain_lease (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    expires_at TEXT NOT NULL
);
"#;

/// Timestamps are stored as RFC 3339 in UTC, which compares correctly as
/// text for the lease expiry check.
fn ts_string(dt: chrono::DateTime<Utc>) -> String {
  dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

impl DurableQueue for SqliteQueue {
  fn enqueue(&self, req: &Request) -> Result<i64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let enqueued_at = Utc::now();
    let key = idempotency_key(req.method, &req.url, enqueued_at);
    let headers = serde_json::to_string(&req.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT INTO deferred_actions (url, method, headers, body, idempotency_key, enqueued_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          req.url.as_str(),
          req.method.as_str(),
          headers,
          req.body,
          key,
          ts_string(enqueued_at),
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue deferred action: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn peek_all(&self) -> Result<Vec<DeferredAction>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, url, method, headers, body, idempotency_key, enqueued_at, attempts
         FROM deferred_actions WHERE abandoned = 0 ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare queue listing: {}", e))?;

    let rows: Vec<(i64, String, String, String, Option<Vec<u8>>, String, String, u32)> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
          row.get(7)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list deferred actions: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut actions = Vec::with_capacity(rows.len());
    for (id, url, method, headers, body, key, enqueued_at, attempts) in rows {
      let method = Method::parse(&method)?;
      let headers = serde_json::from_str(&headers)
        .map_err(|e| eyre!("Failed to parse stored headers for action {}: {}", id, e))?;
      let enqueued_at = chrono::DateTime::parse_from_rfc3339(&enqueued_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| eyre!("Failed to parse enqueued_at for action {}: {}", id, e))?;

      actions.push(DeferredAction {
        id,
        url,
        method,
        headers,
        body,
        enqueued_at,
        attempts,
        idempotency_key: key,
      });
    }

    Ok(actions)
  }

  fn remove(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM deferred_actions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove deferred action {}: {}", id, e))?;

    Ok(())
  }

  fn record_attempt(&self, id: i64) -> Result<u32> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "UPDATE deferred_actions SET attempts = attempts + 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to record attempt for action {}: {}", id, e))?;

    let attempts: u32 = conn
      .query_row(
        "SELECT attempts FROM deferred_actions WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to read attempts for action {}: {}", id, e))?;

    Ok(attempts)
  }

  fn mark_abandoned(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "UPDATE deferred_actions SET abandoned = 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to abandon action {}: {}", id, e))?;

    Ok(())
  }

  fn pending_count(&self) -> Result<u64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: u64 = conn
      .query_row(
        "SELECT COUNT(*) FROM deferred_actions WHERE abandoned = 0",
        [],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count pending actions: {}", e))?;

    Ok(count)
  }

  fn abandoned_count(&self) -> Result<u64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: u64 = conn
      .query_row(
        "SELECT COUNT(*) FROM deferred_actions WHERE abandoned = 1",
        [],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count abandoned actions: {}", e))?;

    Ok(count)
  }

  fn try_acquire_lease(&self, ttl: chrono::Duration) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Expired leases can be stolen; a crashed drain does not wedge the
    // queue forever.
    conn
      .execute(
        "DELETE FROM drain_lease WHERE expires_at < ?",
        params![ts_string(Utc::now())],
      )
      .map_err(|e| eyre!("Failed to clear expired lease: {}", e))?;

    let expires_at = ts_string(Utc::now() + ttl);

    let inserted = conn
      .execute(
        "INSERT OR IGNORE INTO drain_lease (id, expires_at) VALUES (1, ?)",
        params![expires_at],
      )
      .map_err(|e| eyre!("Failed to acquire drain lease: {}", e))?;

    Ok(inserted == 1)
  }

  fn release_lease(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM drain_lease WHERE id = 1", [])
      .map_err(|e| eyre!("Failed to release drain lease: {}", e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn post(path: &str) -> Request {
    Request::new(
      Method::Post,
      Url::parse(&format!("https://app.example.com{}", path)).unwrap(),
    )
    .with_body(b"{}".to_vec())
  }

  #[test]
  fn test_enqueue_preserves_insertion_order() {
    let queue = SqliteQueue::open_in_memory().unwrap();
    queue.enqueue(&post("/api/resumes")).unwrap();
    queue.enqueue(&post("/api/profile")).unwrap();
    queue.enqueue(&post("/api/settings")).unwrap();

    let actions = queue.peek_all().unwrap();
    let paths: Vec<&str> = actions
      .iter()
      .map(|a| a.url.trim_start_matches("https://app.example.com"))
      .collect();
    assert_eq!(paths, vec!["/api/resumes", "/api/profile", "/api/settings"]);
  }

  #[test]
  fn test_remove_and_counts() {
    let queue = SqliteQueue::open_in_memory().unwrap();
    let id = queue.enqueue(&post("/api/resumes")).unwrap();
    assert_eq!(queue.pending_count().unwrap(), 1);

    queue.remove(id).unwrap();
    assert_eq!(queue.pending_count().unwrap(), 0);
  }

  #[test]
  fn test_abandoned_entries_are_kept_but_skipped() {
    let queue = SqliteQueue::open_in_memory().unwrap();
    let id = queue.enqueue(&post("/api/resumes")).unwrap();

    queue.mark_abandoned(id).unwrap();

    assert!(queue.peek_all().unwrap().is_empty());
    assert_eq!(queue.pending_count().unwrap(), 0);
    assert_eq!(queue.abandoned_count().unwrap(), 1);
  }

  #[test]
  fn test_record_attempt_increments() {
    let queue = SqliteQueue::open_in_memory().unwrap();
    let id = queue.enqueue(&post("/api/resumes")).unwrap();

    assert_eq!(queue.record_attempt(id).unwrap(), 1);
    assert_eq!(queue.record_attempt(id).unwrap(), 2);
  }

  #[test]
  fn test_lease_is_exclusive_until_released() {
    let queue = SqliteQueue::open_in_memory().unwrap();
    let ttl = chrono::Duration::seconds(60);

    assert!(queue.try_acquire_lease(ttl).unwrap());
    assert!(!queue.try_acquire_lease(ttl).unwrap());

    queue.release_lease().unwrap();
    assert!(queue.try_acquire_lease(ttl).unwrap());
  }

  #[test]
  fn test_expired_lease_can_be_stolen() {
    let queue = SqliteQueue::open_in_memory().unwrap();

    assert!(queue.try_acquire_lease(chrono::Duration::seconds(-1)).unwrap());
    assert!(queue.try_acquire_lease(chrono::Duration::seconds(60)).unwrap());
  }

  #[test]
  fn test_enqueued_actions_round_trip() {
    let queue = SqliteQueue::open_in_memory().unwrap();
    let req = post("/api/resumes").with_header("content-type", "application/json");
    queue.enqueue(&req).unwrap();

    let actions = queue.peek_all().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].method, Method::Post);
    assert_eq!(actions[0].body.as_deref(), Some(b"{}".as_slice()));
    assert_eq!(
      actions[0].headers.get("content-type").unwrap(),
      "application/json"
    );
    assert!(!actions[0].idempotency_key.is_empty());
  }
}
