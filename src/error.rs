/// Error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum SmartLimiterError {
    /// The tier list is odd-length or holds a non-positive value.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// The store does not know the script hash (e.g. after a restart).
    #[error("script unavailable: {0}")]
    ScriptUnavailable(String),

    /// The store could not serve the evaluation.
    #[error("store failure: {0}")]
    StoreFailure(String),

    /// Redis error.
    #[error("redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Missing or unusable configuration, detected at setup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Invalid key prefix.
    #[error("invalid key prefix: {0}")]
    InvalidKeyPrefix(String),

    /// Invalid request limit.
    #[error("invalid request limit: {0}")]
    InvalidRequestLimit(String),

    /// Invalid window duration.
    #[error("invalid window duration: {0}")]
    InvalidWindowDuration(String),
}

impl SmartLimiterError {
    /// Whether the error means the backing store was unusable for this call.
    ///
    /// Callers that fail open treat these as "admit without limiting".
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Self::ScriptUnavailable(_) | Self::StoreFailure(_) | Self::RedisError(_)
        )
    }
}
