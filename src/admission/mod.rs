//! Admission Control
//!
//! Gates applied before a donation reaches the distribution pipeline:
//! a global token-bucket rate limiter and per-address duplicate suppression
//! backed by a TTL key-value store.
//!
//! Both the limiter and the distribution lock are process-local. Running
//! several relay instances multiplies the effective rate limit; only the
//! idempotency store (Redis) is shared across instances.
//!
//! Created: 2026-10-19

pub mod idempotency;
pub mod rate_limiter;
pub mod store;

pub use idempotency::IdempotencyGuard;
pub use rate_limiter::RateLimiter;
pub use store::{MemoryTtlStore, RedisTtlStore, TtlStore};
