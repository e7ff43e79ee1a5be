use std::{
    ops::Deref,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::SmartLimiterError;

/// A validated prefix prepended to every subject ID to form its store key.
///
/// Constraints:
/// - Must not be empty
/// - Must not be longer than 255 characters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPrefix(Arc<str>);

impl KeyPrefix {
    /// The prefix used when none is configured: `"LIMIT:"`.
    pub fn default_prefix() -> Self {
        Self(Arc::from("LIMIT:"))
    }
}

impl Default for KeyPrefix {
    fn default() -> Self {
        Self::default_prefix()
    }
}

impl Deref for KeyPrefix {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<String> for KeyPrefix {
    type Error = SmartLimiterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(SmartLimiterError::InvalidKeyPrefix(
                "Key prefix must not be empty".to_string(),
            ))
        } else if value.len() > 255 {
            Err(SmartLimiterError::InvalidKeyPrefix(
                "Key prefix must not be longer than 255 characters".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

impl TryFrom<&str> for KeyPrefix {
    type Error = SmartLimiterError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

/// Largest limit or window accepted anywhere in a policy.
///
/// The escalation script does its arithmetic on Lua numbers (doubles), which
/// hold integers exactly only up to 2^53 - 1.
pub const MAX_TIER_VALUE: i64 = (1 << 53) - 1;

/// Maximum admissions per window of the default single-tier policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestLimit(u64);

impl Default for RequestLimit {
    /// Returns a limit of 100 requests.
    fn default() -> Self {
        Self(100)
    }
}

impl Deref for RequestLimit {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for RequestLimit {
    type Error = SmartLimiterError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(SmartLimiterError::InvalidRequestLimit(
                "Request limit must be greater than 0".to_string(),
            ))
        } else if value > MAX_TIER_VALUE as u64 {
            Err(SmartLimiterError::InvalidRequestLimit(format!(
                "Request limit must not exceed {MAX_TIER_VALUE}"
            )))
        } else {
            Ok(Self(value))
        }
    }
}

/// Window length of the default single-tier policy, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WindowDurationMs(u64);

impl Default for WindowDurationMs {
    /// Returns a window of one minute.
    fn default() -> Self {
        Self(60_000)
    }
}

impl Deref for WindowDurationMs {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for WindowDurationMs {
    type Error = SmartLimiterError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(SmartLimiterError::InvalidWindowDuration(
                "Window duration must be at least 1ms".to_string(),
            ))
        } else if value > MAX_TIER_VALUE as u64 {
            Err(SmartLimiterError::InvalidWindowDuration(format!(
                "Window duration must not exceed {MAX_TIER_VALUE}ms"
            )))
        } else {
            Ok(Self(value))
        }
    }
}

impl TryFrom<Duration> for WindowDurationMs {
    type Error = SmartLimiterError;

    fn try_from(value: Duration) -> Result<Self, Self::Error> {
        let millis = u64::try_from(value.as_millis()).map_err(|_| {
            SmartLimiterError::InvalidWindowDuration("Window duration is too large".to_string())
        })?;

        Self::try_from(millis)
    }
}

/// Check a flat `[limit, window_ms, limit, window_ms, ...]` tier list.
///
/// An empty list is valid here; the limiter substitutes its default tier.
/// Every value must lie in `1..=MAX_TIER_VALUE`.
pub(crate) fn validate_policy(tiers: &[i64]) -> Result<(), SmartLimiterError> {
    if tiers.len() % 2 == 1 {
        return Err(SmartLimiterError::InvalidPolicy(
            "tier values must be paired as (limit, window_ms)".to_string(),
        ));
    }

    if let Some(value) = tiers.iter().find(|value| **value <= 0) {
        return Err(SmartLimiterError::InvalidPolicy(format!(
            "tier values must be positive integers, got {value}"
        )));
    }

    if let Some(value) = tiers.iter().find(|value| **value > MAX_TIER_VALUE) {
        return Err(SmartLimiterError::InvalidPolicy(format!(
            "tier values must not exceed {MAX_TIER_VALUE}, got {value}"
        )));
    }

    Ok(())
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// Snapshot of a subject's quota after one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Limit of the tier governing the current window.
    pub total: i64,
    /// Admissions left in the window; `-1` once the window is exhausted.
    pub remaining: i64,
    /// Length of the current window.
    pub duration: Duration,
    /// When the current window ends.
    pub reset_at: SystemTime,
}

impl RateLimitResult {
    pub(crate) fn from_millis(total: i64, remaining: i64, window_ms: i64, reset_at_ms: i64) -> Self {
        let duration = Duration::from_millis(window_ms.max(0) as u64);
        let reset_at = UNIX_EPOCH + Duration::from_millis(reset_at_ms.max(0) as u64);

        Self {
            total,
            remaining,
            duration,
            reset_at,
        }
    }

    /// Whether this call was over quota and must be rejected.
    pub fn is_exhausted(&self) -> bool {
        self.remaining < 0
    }

    /// Time left until the window resets, measured from `now`.
    pub fn retry_after(&self, now: SystemTime) -> Duration {
        self.reset_at.duration_since(now).unwrap_or(Duration::ZERO)
    }

    /// The reset instant as whole seconds since the Unix epoch.
    pub fn reset_epoch_seconds(&self) -> u64 {
        self.reset_at
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}
