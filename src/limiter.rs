//! The limiter façade.

use std::sync::Arc;

use crate::{
    CountingEngine, KeyPrefix, LimiterStore, RateLimitResult, RequestLimit, SmartLimiterError,
    WindowDurationMs,
    common::{now_millis, validate_policy},
};

/// Configuration for [`Limiter`].
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use smartlimiter::{Limiter, LimiterOptions, MemoryStore, RequestLimit, WindowDurationMs};
///
/// # async fn build() -> Result<Limiter, smartlimiter::SmartLimiterError> {
/// let limiter = Limiter::new(LimiterOptions {
///     prefix: None, // keys: LIMIT:<subject>
///     max: RequestLimit::try_from(1000)?,
///     duration: WindowDurationMs::try_from(60_000)?,
///     ..LimiterOptions::new(Arc::new(MemoryStore::new()))
/// })
/// .await?;
/// # Ok(limiter)
/// # }
/// ```
#[derive(Clone)]
pub struct LimiterOptions {
    /// Backing store shared by every process enforcing the same limits.
    pub store: Arc<dyn LimiterStore>,

    /// Prefix of every subject key. Defaults to `"LIMIT:"`.
    pub prefix: Option<KeyPrefix>,

    /// Limit of the default tier used when a call passes no tiers.
    pub max: RequestLimit,

    /// Window of the default tier used when a call passes no tiers.
    pub duration: WindowDurationMs,
}

impl LimiterOptions {
    /// Options with every field but the store left at its default.
    pub fn new(store: Arc<dyn LimiterStore>) -> Self {
        Self {
            store,
            prefix: None,
            max: RequestLimit::default(),
            duration: WindowDurationMs::default(),
        }
    }
}

/// Distributed fixed-window rate limiter with policy escalation.
///
/// A policy is a flat tier list `[limit, window_ms, limit, window_ms, ...]`.
/// A subject starts on the first tier. Each rejected call while a window is
/// exhausted moves the subject one tier further along the list for the next
/// window; the escalation decays back to the first tier once the subject stays
/// quiet for twice the length of its last window.
///
/// # Consistency
///
/// Every [`get`](Self::get) is a single atomic evaluation in the store, so
/// concurrent callers on any number of processes are serialized per subject.
/// The limiter itself holds no per-subject state and takes no locks.
///
/// # Failure policy
///
/// Store errors are returned untouched. Callers are expected to fail open:
/// when [`SmartLimiterError::is_store_failure`] holds, admit the unit of work
/// rather than reject it, so an unavailable store never turns into an outage.
pub struct Limiter {
    engine: CountingEngine,
    prefix: KeyPrefix,
    default_policy: [i64; 2],
}

impl Limiter {
    /// Build a limiter, registering the algorithm with the store.
    ///
    /// Fails when the store rejects the registration.
    pub async fn new(options: LimiterOptions) -> Result<Self, SmartLimiterError> {
        let LimiterOptions {
            store,
            prefix,
            max,
            duration,
        } = options;

        let engine = CountingEngine::new(store).await?;

        Ok(Self {
            engine,
            prefix: prefix.unwrap_or_else(KeyPrefix::default_prefix),
            default_policy: [*max as i64, *duration as i64],
        })
    }

    /// Admit one unit of work for `subject_id`.
    ///
    /// `tiers` is a flat `[limit, window_ms, ...]` list; empty means the
    /// configured default tier. An odd-length list, a non-positive value or
    /// one above [`MAX_TIER_VALUE`](crate::MAX_TIER_VALUE) fails with
    /// [`SmartLimiterError::InvalidPolicy`] without touching the store.
    ///
    /// A result with `remaining < 0` means the unit of work must be rejected.
    ///
    /// On [`RedisClusterStore`](crate::RedisClusterStore), prefixes and subject
    /// IDs must not contain `{` or `}`: a hash tag in the subject key splits
    /// the record and its escalation pointer across slots (see
    /// [`escalation_key`](crate::escalation_key)) and every call fails.
    pub async fn get(
        &self,
        subject_id: &str,
        tiers: &[i64],
    ) -> Result<RateLimitResult, SmartLimiterError> {
        validate_policy(tiers)?;

        let tiers = if tiers.is_empty() {
            &self.default_policy[..]
        } else {
            tiers
        };

        let subject_key = self.subject_key(subject_id);
        let reply = self
            .engine
            .evaluate(&subject_key, now_millis(), tiers)
            .await?;

        Ok(RateLimitResult::from_millis(
            reply.total,
            reply.remaining,
            reply.window_ms,
            reply.reset_at_ms,
        ))
    } // end method get

    /// Drop the current window of `subject_id`.
    ///
    /// The escalation pointer is kept, so the next call opens a fresh window
    /// at the subject's current tier rather than the first one.
    pub async fn remove(&self, subject_id: &str) -> Result<(), SmartLimiterError> {
        self.engine.store().delete(&self.subject_key(subject_id)).await
    }

    /// Prefix applied to every subject ID.
    pub fn prefix(&self) -> &KeyPrefix {
        &self.prefix
    }

    /// The `[limit, window_ms]` tier used when a call passes no tiers.
    pub fn default_policy(&self) -> [i64; 2] {
        self.default_policy
    }

    /// The counting engine behind this limiter.
    pub fn engine(&self) -> &CountingEngine {
        &self.engine
    }

    /// Store key of `subject_id`.
    pub fn subject_key(&self, subject_id: &str) -> String {
        format!("{}{}", &*self.prefix, subject_id)
    }
}
