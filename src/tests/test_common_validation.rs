use std::time::{Duration, UNIX_EPOCH};

use crate::{
    KeyPrefix, MAX_TIER_VALUE, RateLimitResult, RequestLimit, SmartLimiterError, WindowDurationMs,
    common::validate_policy, escalation_key,
};

#[test]
fn key_prefix_try_from_validates_length() {
    let prefix = KeyPrefix::try_from("api:").unwrap();
    assert_eq!(&*prefix, "api:");

    assert!(matches!(
        KeyPrefix::try_from(String::new()).unwrap_err(),
        SmartLimiterError::InvalidKeyPrefix(_)
    ));
    assert!(matches!(
        KeyPrefix::try_from("x".repeat(256)).unwrap_err(),
        SmartLimiterError::InvalidKeyPrefix(_)
    ));

    assert_eq!(&*KeyPrefix::default(), "LIMIT:");
}

#[test]
fn request_limit_try_from_validates_positive() {
    assert_eq!(*RequestLimit::try_from(5).unwrap(), 5);
    assert_eq!(*RequestLimit::default(), 100);

    assert!(matches!(
        RequestLimit::try_from(0).unwrap_err(),
        SmartLimiterError::InvalidRequestLimit(_)
    ));
    assert!(matches!(
        RequestLimit::try_from(u64::MAX).unwrap_err(),
        SmartLimiterError::InvalidRequestLimit(_)
    ));
}

#[test]
fn window_duration_try_from_validates_min_1ms() {
    assert_eq!(*WindowDurationMs::try_from(1).unwrap(), 1);
    assert_eq!(*WindowDurationMs::default(), 60_000);
    assert_eq!(
        *WindowDurationMs::try_from(Duration::from_secs(2)).unwrap(),
        2_000
    );

    assert_eq!(
        WindowDurationMs::try_from(0).unwrap_err().to_string(),
        "invalid window duration: Window duration must be at least 1ms"
    );
    assert!(WindowDurationMs::try_from(Duration::from_micros(500)).is_err());
}

#[test]
fn validate_policy_rejects_odd_and_non_positive() {
    assert!(validate_policy(&[]).is_ok());
    assert!(validate_policy(&[10, 1000]).is_ok());
    assert!(validate_policy(&[2, 300, 1, 200]).is_ok());

    assert!(matches!(
        validate_policy(&[10]),
        Err(SmartLimiterError::InvalidPolicy(_))
    ));
    assert!(matches!(
        validate_policy(&[2, 2000, 1000, 3, 1000, 4, 10000]),
        Err(SmartLimiterError::InvalidPolicy(_))
    ));
    assert!(matches!(
        validate_policy(&[10, 0]),
        Err(SmartLimiterError::InvalidPolicy(_))
    ));
    assert!(matches!(
        validate_policy(&[-1, 1000]),
        Err(SmartLimiterError::InvalidPolicy(_))
    ));
}

#[test]
fn escalation_key_wraps_subject_in_hash_tag() {
    assert_eq!(escalation_key("LIMIT:user"), "{LIMIT:user}:S");
}

#[test]
fn rate_limit_result_converts_millis() {
    let result = RateLimitResult::from_millis(10, -1, 1_500, 1_700_000_001_500);

    assert_eq!(result.duration, Duration::from_millis(1_500));
    assert_eq!(
        result.reset_at,
        UNIX_EPOCH + Duration::from_millis(1_700_000_001_500)
    );
    assert_eq!(result.reset_epoch_seconds(), 1_700_000_001);
    assert!(result.is_exhausted());

    let earlier = UNIX_EPOCH + Duration::from_millis(1_700_000_000_000);
    assert_eq!(result.retry_after(earlier), Duration::from_millis(1_500));

    let later = UNIX_EPOCH + Duration::from_millis(1_800_000_000_000);
    assert_eq!(result.retry_after(later), Duration::ZERO);
}

#[test]
fn store_failure_classification() {
    assert!(SmartLimiterError::StoreFailure("down".to_string()).is_store_failure());
    assert!(SmartLimiterError::ScriptUnavailable("gone".to_string()).is_store_failure());
    assert!(!SmartLimiterError::InvalidPolicy("odd".to_string()).is_store_failure());
    assert!(!SmartLimiterError::Configuration("missing".to_string()).is_store_failure());
}

#[test]
fn values_are_capped_at_exact_lua_integers() {
    let max = MAX_TIER_VALUE as u64;
    assert_eq!(MAX_TIER_VALUE, 9_007_199_254_740_991);

    assert_eq!(*RequestLimit::try_from(max).unwrap(), max);
    assert!(matches!(
        RequestLimit::try_from(max + 1).unwrap_err(),
        SmartLimiterError::InvalidRequestLimit(_)
    ));

    assert_eq!(*WindowDurationMs::try_from(max).unwrap(), max);
    assert!(matches!(
        WindowDurationMs::try_from(max + 1).unwrap_err(),
        SmartLimiterError::InvalidWindowDuration(_)
    ));

    assert!(validate_policy(&[MAX_TIER_VALUE, MAX_TIER_VALUE]).is_ok());
    assert!(matches!(
        validate_policy(&[1, MAX_TIER_VALUE + 1]),
        Err(SmartLimiterError::InvalidPolicy(_))
    ));
    assert!(matches!(
        validate_policy(&[i64::MAX, 1_000]),
        Err(SmartLimiterError::InvalidPolicy(_))
    ));
}

#[test]
fn escalation_key_keeps_tagged_subject_verbatim() {
    // The outer tag stops at the first `}`, so this pointer and its record
    // hash to different cluster slots.
    assert_eq!(escalation_key("LIMIT:a{b}"), "{LIMIT:a{b}}:S");
}
