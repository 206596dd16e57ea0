//! Durable request queue for asynchronous reviews.
//!
//! Built on Redis Streams:
//! - one append-only stream (default `review:agent-requests`) shared by all
//!   workers through a single consumer group (default `agent-workers`),
//! - exclusive delivery per record within the group, explicit `XACK`,
//! - stale pending entries reclaimed via `XAUTOCLAIM` past a visibility
//!   timeout (at-least-once delivery),
//! - a per-request idempotency hash (`review:results:<request_id>`) holding
//!   the terminal outcome with a TTL, giving effectively-once completion.
//!
//! The queue knows nothing about review semantics beyond the flat
//! [`QueuedRequest`] record; pipeline types stay upstream.

pub mod errors;
pub mod idempotency;
pub mod stream;
pub mod types;

pub use errors::{QueueError, QueueResult};
pub use idempotency::{IdempotencyStore, RequestStatus, ResultRecord};
pub use stream::{QueueConfig, RequestQueue};
pub use types::QueuedRequest;
