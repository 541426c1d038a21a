//! Deferred action queue: durable record of mutating requests made while
//! offline, replayed in FIFO order when connectivity returns.
//!
//! Replay is at-least-once; every attempt for an entry carries the same
//! idempotency key so the server side can deduplicate.

mod action;
mod replay;
mod storage;

pub use action::DeferredAction;
pub use replay::{drain, DrainReport};
pub use storage::{DurableQueue, SqliteQueue};
