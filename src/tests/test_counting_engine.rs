use std::sync::{Arc, atomic::Ordering};

use crate::{
    CountingEngine, ESCALATION_SCRIPT, Limiter, LimiterOptions, SmartLimiterError,
    script::script_hash,
};

use super::{
    runtime::block_on,
    test_store::{TestStore, limiter_with},
};

#[test]
fn construction_registers_script() {
    block_on(async {
        let store = TestStore::new();
        let engine = CountingEngine::new(store.clone()).await.unwrap();

        assert_eq!(store.loads(), 1);
        assert_eq!(&*engine.script_hash(), script_hash(ESCALATION_SCRIPT));
    });
}

#[test]
fn construction_fails_when_registration_fails() {
    block_on(async {
        let store = TestStore::new();
        store.fail_load.store(true, Ordering::SeqCst);

        let err = Limiter::new(LimiterOptions::new(store.clone()))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, SmartLimiterError::RedisError(_)));
        assert_eq!(store.evals(), 0);
    });
}

#[test]
fn reloads_script_once_after_cache_eviction() {
    block_on(async {
        let store = TestStore::new();
        let limiter = limiter_with(store.clone()).await;
        let tiers = [3, 10_000];

        let r = limiter.get("reload", &tiers).await.unwrap();
        assert_eq!(r.remaining, 2);
        assert_eq!((store.loads(), store.evals()), (1, 1));

        // Simulates a store restart that dropped its script cache.
        store.inner.flush_scripts();

        let r = limiter.get("reload", &tiers).await.unwrap();
        assert_eq!(r.remaining, 1);
        assert_eq!((store.loads(), store.evals()), (2, 3));

        // The fresh hash is cached; no further reloads.
        let r = limiter.get("reload", &tiers).await.unwrap();
        assert_eq!(r.remaining, 0);
        assert_eq!((store.loads(), store.evals()), (2, 4));
    });
}

#[test]
fn second_cache_miss_surfaces_as_store_failure() {
    block_on(async {
        let store = TestStore::new();
        let limiter = limiter_with(store.clone()).await;
        store.always_noscript.store(true, Ordering::SeqCst);

        let err = limiter.get("noscript", &[3, 10_000]).await.unwrap_err();

        assert!(matches!(err, SmartLimiterError::StoreFailure(_)));
        assert!(err.is_store_failure());
        assert_eq!((store.loads(), store.evals()), (2, 2));
    });
}

#[test]
fn reload_failure_is_surfaced() {
    block_on(async {
        let store = TestStore::new();
        let limiter = limiter_with(store.clone()).await;

        store.inner.flush_scripts();
        store.fail_load.store(true, Ordering::SeqCst);

        let err = limiter.get("reload-fails", &[3, 10_000]).await.unwrap_err();

        assert!(matches!(err, SmartLimiterError::RedisError(_)));
        assert_eq!((store.loads(), store.evals()), (2, 1));
    });
}

#[test]
fn other_store_errors_are_not_retried() {
    block_on(async {
        let store = TestStore::new();
        let limiter = limiter_with(store.clone()).await;
        store.fail_eval.store(true, Ordering::SeqCst);

        let err = limiter.get("down", &[3, 10_000]).await.unwrap_err();

        assert!(matches!(err, SmartLimiterError::RedisError(_)));
        assert!(err.is_store_failure());
        assert_eq!((store.loads(), store.evals()), (1, 1));
    });
}

#[test]
fn engine_passes_colocated_keys() {
    block_on(async {
        let store = TestStore::new();
        let engine = CountingEngine::new(store.clone()).await.unwrap();

        let reply = engine
            .evaluate("LIMIT:engine", 1_000, &[2, 300, 1, 200])
            .await
            .unwrap();

        assert_eq!(reply.remaining, 1);
        assert_eq!(reply.total, 2);
        assert_eq!(reply.window_ms, 300);
        assert_eq!(reply.reset_at_ms, 1_300);
        assert_eq!(store.inner.escalation_index("LIMIT:engine"), Some(1));
    });
}

#[test]
fn engine_store_is_shared() {
    block_on(async {
        let store = TestStore::new();
        let engine = CountingEngine::new(store.clone()).await.unwrap();

        engine.store().delete("LIMIT:any").await.unwrap();

        assert_eq!(store.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(Arc::strong_count(&store), 2);
    });
}
