//! In-process store.
//!
//! [`MemoryStore`] keeps counter records and escalation pointers in a
//! [`DashMap`](dashmap::DashMap) inside the current process and runs the
//! escalation algorithm natively under a per-subject shard lock.
//!
//! # When to Use
//!
//! - Single-process applications
//! - Tests and local development without a Redis server
//!
//! Limits are not shared across processes and do not survive a restart; use
//! [`RedisStore`](crate::RedisStore) or [`RedisClusterStore`](crate::RedisClusterStore)
//! when several instances must enforce one quota.

mod memory_store;
pub use memory_store::*;
