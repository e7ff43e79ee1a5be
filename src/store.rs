//! Capability interface over the key-value store that holds counter state.
//!
//! The limiter never talks to a wire client directly. Every backend (a single
//! Redis node, a Redis Cluster, or the in-process [`MemoryStore`](crate::MemoryStore))
//! implements [`LimiterStore`] and is picked when the [`Limiter`](crate::Limiter)
//! is built.

use std::time::Duration;

use async_trait::async_trait;

use crate::{ScriptReply, SmartLimiterError};

/// Operations the counting engine needs from a store with atomic scripting.
///
/// Implementations must run [`eval_script`](LimiterStore::eval_script) as one
/// indivisible unit: no other caller may observe or interleave with the
/// script's reads and writes on the keys it is given.
#[async_trait]
pub trait LimiterStore: Send + Sync {
    /// Delete `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), SmartLimiterError>;

    /// Register a script body and return its content hash.
    ///
    /// Registering the same body twice yields the same hash.
    async fn load_script(&self, body: &str) -> Result<String, SmartLimiterError>;

    /// Evaluate a registered script by hash.
    ///
    /// Returns [`SmartLimiterError::ScriptUnavailable`] when the store does not
    /// know `hash`.
    async fn eval_script(
        &self,
        hash: &str,
        keys: &[String],
        args: &[i64],
    ) -> Result<ScriptReply, SmartLimiterError>;

    /// Set `key` to `value` with a time-to-live. Diagnostic use only.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SmartLimiterError>;
}
