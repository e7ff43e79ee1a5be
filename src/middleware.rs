//! HTTP admission on top of [`Limiter`].
//!
//! Framework-agnostic: it works on [`http`] crate types, so any server built on
//! them (hyper, axum, tower services) can call [`HttpRateLimiter::check`] before
//! dispatching a request and act on the returned [`Admission`].
//!
//! # Policy resolution
//!
//! A [`PolicyTable`] maps route keys to tier lists. For a request the lookup
//! order is:
//!
//! 1. `"METHOD PATH"`, e.g. `"GET /a"`
//! 2. `"PATH"`, e.g. `"/a"`
//! 3. `"METHOD"`, e.g. `"GET"`
//!
//! A request matching none of them is not limited.
//!
//! # Fail-open
//!
//! Any error from the limiter (store unavailable, an invalid tier list in the
//! table) admits the request without rate-limit headers.

use std::{collections::HashMap, sync::Arc, time::SystemTime};

use http::{
    Extensions, HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri,
    header::RETRY_AFTER, request::Parts,
};

use crate::{Limiter, RateLimitResult, SmartLimiterError};

/// Limit of the tier governing the current window.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Admissions left in the current window; negative once exhausted.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Window reset as Unix epoch seconds.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Route keys mapped to flat `[limit, window_ms, ...]` tier lists.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    policies: HashMap<String, Vec<i64>>,
}

/// A [`PolicyTable`] entry matched by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPolicy<'a> {
    /// Route key that matched, used as the subject's routing discriminator.
    pub key: &'a str,
    /// Tier list of the matched entry.
    pub tiers: &'a [i64],
}

impl PolicyTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a policy for `key` (`"METHOD PATH"`, `"PATH"` or `"METHOD"`).
    pub fn with_policy(mut self, key: impl Into<String>, tiers: Vec<i64>) -> Self {
        self.insert(key, tiers);
        self
    }

    /// Add or replace a policy for `key`.
    pub fn insert(&mut self, key: impl Into<String>, tiers: Vec<i64>) {
        self.policies.insert(key.into(), tiers);
    }

    /// Whether the table has no policies.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Find the policy governing `method` on `path`.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<ResolvedPolicy<'_>> {
        let candidates = [
            format!("{} {}", method.as_str(), path),
            path.to_string(),
            method.as_str().to_string(),
        ];

        candidates.iter().find_map(|candidate| {
            self.policies
                .get_key_value(candidate.as_str())
                .map(|(key, tiers)| ResolvedPolicy {
                    key: key.as_str(),
                    tiers: tiers.as_slice(),
                })
        })
    }
}

impl<K: Into<String>> FromIterator<(K, Vec<i64>)> for PolicyTable {
    fn from_iter<I: IntoIterator<Item = (K, Vec<i64>)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (key, tiers) in iter {
            table.insert(key, tiers);
        }
        table
    }
}

/// Borrowed view of the request fields a subject can be derived from.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    /// Request method.
    pub method: &'a Method,
    /// Request URI.
    pub uri: &'a Uri,
    /// Request headers.
    pub headers: &'a HeaderMap,
    /// Request extensions, e.g. a peer address stored by the server.
    pub extensions: &'a Extensions,
}

impl<'a, B> From<&'a Request<B>> for RequestInfo<'a> {
    fn from(request: &'a Request<B>) -> Self {
        Self {
            method: request.method(),
            uri: request.uri(),
            headers: request.headers(),
            extensions: request.extensions(),
        }
    }
}

impl<'a> From<&'a Parts> for RequestInfo<'a> {
    fn from(parts: &'a Parts) -> Self {
        Self {
            method: &parts.method,
            uri: &parts.uri,
            headers: &parts.headers,
            extensions: &parts.extensions,
        }
    }
}

/// Identifies the subject (user, client IP, token) behind a request.
///
/// `None` or an empty string lets the request through unlimited.
pub type SubjectIdFn = Arc<dyn Fn(&RequestInfo<'_>) -> Option<String> + Send + Sync>;

/// Configuration for [`HttpRateLimiter`].
#[derive(Clone)]
pub struct HttpRateLimiterOptions {
    /// Limiter shared with the rest of the process.
    pub limiter: Arc<Limiter>,
    /// Route policies.
    pub policies: PolicyTable,
    /// Subject identification. Required.
    pub subject_id: Option<SubjectIdFn>,
}

/// Outcome of [`HttpRateLimiter::check`].
#[derive(Debug)]
pub enum Admission {
    /// No policy applies, the subject is unknown, or the limiter failed open.
    Unlimited,
    /// Within quota; the headers belong on the eventual response.
    Admitted {
        /// Rate-limit headers.
        headers: HeaderMap,
    },
    /// Over quota; the request must be answered with [`Admission::into_rejection`].
    Rejected {
        /// Rate-limit headers, including `retry-after`.
        headers: HeaderMap,
        /// Whole seconds until the window resets.
        retry_after_secs: u64,
    },
}

impl Admission {
    /// Whether the request must be rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Rate-limit headers, if the limiter was consulted successfully.
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            Self::Unlimited => None,
            Self::Admitted { headers } | Self::Rejected { headers, .. } => Some(headers),
        }
    }

    /// Copy the rate-limit headers onto a response's headers.
    pub fn apply_headers(&self, target: &mut HeaderMap) {
        if let Some(headers) = self.headers() {
            for (name, value) in headers {
                target.insert(name.clone(), value.clone());
            }
        }
    }

    /// The `429 Too Many Requests` response for a rejected request.
    pub fn into_rejection(self) -> Option<Response<String>> {
        let Self::Rejected {
            headers,
            retry_after_secs,
        } = self
        else {
            return None;
        };

        let mut response = Response::new(format!(
            "Rate limit exceeded, retry in {retry_after_secs} seconds.\n"
        ));
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        *response.headers_mut() = headers;

        Some(response)
    }
}

/// Render the rate-limit headers for `result`, relative to `now`.
pub fn rate_limit_headers(result: &RateLimitResult, now: SystemTime) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(4);

    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(result.total));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(result.reset_epoch_seconds()),
    );

    if result.is_exhausted() {
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from(result.retry_after(now).as_secs()),
        );
    }

    headers
}

/// Rate limits HTTP requests by route policy and subject.
pub struct HttpRateLimiter {
    limiter: Arc<Limiter>,
    policies: PolicyTable,
    subject_id: SubjectIdFn,
}

impl HttpRateLimiter {
    /// Build the HTTP layer.
    ///
    /// Fails with [`SmartLimiterError::Configuration`] when no subject
    /// identification function is given.
    pub fn new(options: HttpRateLimiterOptions) -> Result<Self, SmartLimiterError> {
        let HttpRateLimiterOptions {
            limiter,
            policies,
            subject_id,
        } = options;

        let Some(subject_id) = subject_id else {
            return Err(SmartLimiterError::Configuration(
                "a subject id function is required".to_string(),
            ));
        };

        Ok(Self {
            limiter,
            policies,
            subject_id,
        })
    }

    /// The route policies.
    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Decide whether `request` may proceed.
    pub async fn check(&self, request: RequestInfo<'_>) -> Admission {
        let Some(subject_id) = (self.subject_id)(&request).filter(|id| !id.is_empty()) else {
            return Admission::Unlimited;
        };

        let Some(policy) = self.policies.resolve(request.method, request.uri.path()) else {
            return Admission::Unlimited;
        };

        if policy.tiers.is_empty() {
            return Admission::Unlimited;
        }

        let subject = format!("{subject_id}{}", policy.key);

        let result = match self.limiter.get(&subject, policy.tiers).await {
            Ok(result) => result,
            Err(err) if err.is_store_failure() => {
                tracing::error!(
                    error = %err,
                    subject = %subject,
                    "rate limiter store failed, admitting request"
                );
                return Admission::Unlimited;
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    policy = policy.key,
                    "rate limit policy rejected, admitting request"
                );
                return Admission::Unlimited;
            }
        };

        let now = SystemTime::now();
        let headers = rate_limit_headers(&result, now);

        if result.is_exhausted() {
            Admission::Rejected {
                headers,
                retry_after_secs: result.retry_after(now).as_secs(),
            }
        } else {
            Admission::Admitted { headers }
        }
    } // end method check

    /// [`check`](Self::check) for a whole request.
    pub async fn check_request<B>(&self, request: &Request<B>) -> Admission {
        self.check(RequestInfo::from(request)).await
    }
}
