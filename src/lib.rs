#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod common;
pub use common::{KeyPrefix, MAX_TIER_VALUE, RateLimitResult, RequestLimit, WindowDurationMs};

mod error;
pub use error::*;

mod script;
pub use script::{ESCALATION_SCRIPT, ScriptReply, escalation_key};

mod store;
pub use store::*;

mod engine;
pub use engine::*;

mod limiter;
pub use limiter::*;

pub mod local;
pub use self::local::MemoryStore;

pub mod redis;
pub use self::redis::{RedisClusterStore, RedisStore};

pub mod middleware;
pub use middleware::{Admission, HttpRateLimiter, HttpRateLimiterOptions, PolicyTable};

#[cfg(test)]
mod tests;
