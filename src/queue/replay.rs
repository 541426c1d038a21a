//! Replay pass: drain the queue in FIFO order once connectivity returns.

use color_eyre::Result;
use tracing::{debug, info, warn};

use super::storage::DurableQueue;
use crate::net::Network;

/// Outcome of one drain pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
  /// Entries replayed successfully and removed.
  pub replayed: u64,
  /// Entries that failed this pass and stay queued.
  pub failed: u64,
  /// Entries that hit the attempt cap this pass.
  pub abandoned: u64,
}

/// Replay every pending action in insertion order.
///
/// Success removes the entry; failure (transport error or non-2xx) records
/// the attempt and moves on, so one poisoned action does not block the rest.
/// Entries reaching `max_attempts` are marked abandoned. The whole pass is
/// guarded by the queue's drain lease; if another pass holds it, this one is
/// a no-op.
pub async fn drain<N: Network, Q: DurableQueue>(
  net: &N,
  queue: &Q,
  max_attempts: u32,
  lease_ttl: chrono::Duration,
) -> Result<DrainReport> {
  if !queue.try_acquire_lease(lease_ttl)? {
    debug!("drain already in progress elsewhere, skipping");
    return Ok(DrainReport::default());
  }

  let report = drain_locked(net, queue, max_attempts).await;
  queue.release_lease()?;
  report
}

async fn drain_locked<N: Network, Q: DurableQueue>(
  net: &N,
  queue: &Q,
  max_attempts: u32,
) -> Result<DrainReport> {
  let mut report = DrainReport::default();

  for action in queue.peek_all()? {
    let req = match action.to_request() {
      Ok(req) => req,
      Err(e) => {
        // Unparseable entries can never replay; abandon instead of
        // retrying them forever.
        warn!(id = action.id, error = %e, "abandoning malformed deferred action");
        queue.mark_abandoned(action.id)?;
        report.abandoned += 1;
        continue;
      }
    };

    let ok = match net.fetch(&req).await {
      Ok(resp) if resp.is_success() => true,
      Ok(resp) => {
        debug!(id = action.id, status = resp.status, "replay rejected by server");
        false
      }
      Err(e) => {
        debug!(id = action.id, error = %e, "replay failed, still offline?");
        false
      }
    };

    if ok {
      queue.remove(action.id)?;
      report.replayed += 1;
    } else {
      let attempts = queue.record_attempt(action.id)?;
      if attempts >= max_attempts {
        warn!(
          id = action.id,
          attempts, "deferred action hit the attempt cap, abandoning"
        );
        queue.mark_abandoned(action.id)?;
        report.abandoned += 1;
      } else {
        report.failed += 1;
      }
    }
  }

  if report != DrainReport::default() {
    info!(
      replayed = report.replayed,
      failed = report.failed,
      abandoned = report.abandoned,
      "drained deferred action queue"
    );
  }

  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::{Method, Request, Response};
  use crate::net::testing::FakeNetwork;
  use crate::net::NetworkError;
  use crate::queue::SqliteQueue;
  use url::Url;

  fn post(path: &str) -> Request {
    Request::new(
      Method::Post,
      Url::parse(&format!("https://app.example.com{}", path)).unwrap(),
    )
  }

  fn ttl() -> chrono::Duration {
    chrono::Duration::seconds(60)
  }

  #[tokio::test]
  async fn test_drain_replays_in_insertion_order_and_empties_queue() {
    let queue = SqliteQueue::open_in_memory().unwrap();
    queue.enqueue(&post("/api/first")).unwrap();
    queue.enqueue(&post("/api/second")).unwrap();
    queue.enqueue(&post("/api/third")).unwrap();

    let net = FakeNetwork::new();
    for _ in 0..3 {
      net.push_response(Response::new(200));
    }

    let report = drain(&net, &queue, 10, ttl()).await.unwrap();
    assert_eq!(report.replayed, 3);
    assert_eq!(queue.pending_count().unwrap(), 0);

    let paths: Vec<String> = net
      .requests()
      .iter()
      .map(|r| r.url.path().to_string())
      .collect();
    assert_eq!(paths, vec!["/api/first", "/api/second", "/api/third"]);
  }

  #[tokio::test]
  async fn test_failed_entry_stays_queued_while_others_drain() {
    let queue = SqliteQueue::open_in_memory().unwrap();
    queue.enqueue(&post("/api/first")).unwrap();
    let second = queue.enqueue(&post("/api/second")).unwrap();
    queue.enqueue(&post("/api/third")).unwrap();

    let net = FakeNetwork::new();
    net.push_response(Response::new(200));
    net.push_response(Response::new(500));
    net.push_response(Response::new(200));

    let report = drain(&net, &queue, 10, ttl()).await.unwrap();
    assert_eq!(report.replayed, 2);
    assert_eq!(report.failed, 1);

    let remaining = queue.peek_all().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, second);
    assert_eq!(remaining[0].attempts, 1);
  }

  #[tokio::test]
  async fn test_transport_failure_leaves_entry_for_next_signal() {
    let queue = SqliteQueue::open_in_memory().unwrap();
    queue.enqueue(&post("/api/first")).unwrap();

    let net = FakeNetwork::new();
    net.push_error(NetworkError::Unreachable("still down".to_string()));

    let report = drain(&net, &queue, 10, ttl()).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(queue.pending_count().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_attempt_cap_abandons_entry() {
    let queue = SqliteQueue::open_in_memory().unwrap();
    queue.enqueue(&post("/api/first")).unwrap();

    let net = FakeNetwork::new();
    net.push_response(Response::new(400));
    net.push_response(Response::new(400));

    drain(&net, &queue, 2, ttl()).await.unwrap();
    let report = drain(&net, &queue, 2, ttl()).await.unwrap();

    assert_eq!(report.abandoned, 1);
    assert_eq!(queue.pending_count().unwrap(), 0);
    assert_eq!(queue.abandoned_count().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_drain_is_noop_when_lease_held() {
    let queue = SqliteQueue::open_in_memory().unwrap();
    queue.enqueue(&post("/api/first")).unwrap();
    assert!(queue.try_acquire_lease(ttl()).unwrap());

    let net = FakeNetwork::new();
    net.push_response(Response::new(200));

    let report = drain(&net, &queue, 10, ttl()).await.unwrap();
    assert_eq!(report, DrainReport::default());
    assert_eq!(net.call_count(), 0);
    assert_eq!(queue.pending_count().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_replay_attempts_share_one_idempotency_key() {
    let queue = SqliteQueue::open_in_memory().unwrap();
    queue.enqueue(&post("/api/first")).unwrap();

    let net = FakeNetwork::new();
    net.push_response(Response::new(500));
    net.push_response(Response::new(200));

    drain(&net, &queue, 10, ttl()).await.unwrap();
    drain(&net, &queue, 10, ttl()).await.unwrap();

    let requests = net.requests();
    assert_eq!(requests.len(), 2);
    let key0 = requests[0].headers.get("x-idempotency-key").unwrap();
    let key1 = requests[1].headers.get("x-idempotency-key").unwrap();
    assert_eq!(key0, key1);
  }
}
