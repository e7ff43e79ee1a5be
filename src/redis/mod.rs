//! Redis-backed stores.
//!
//! Both stores evaluate the escalation algorithm as a Lua script with
//! `EVALSHA`, so each admission is one atomic round trip.
//!
//! # Requirements
//!
//! - **Redis version:** >= 4.0 (`HSET` with several fields, `PEXPIRE`)
//! - **Runtime:** Tokio

mod common;

mod redis_store;
pub use redis_store::*;

mod redis_cluster_store;
pub use redis_cluster_store::*;
