use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use redis::{ErrorKind, RedisError};

use crate::{LimiterStore, Limiter, LimiterOptions, MemoryStore, ScriptReply, SmartLimiterError};

/// A [`MemoryStore`] wrapper that counts calls and injects failures.
#[derive(Default)]
pub(super) struct TestStore {
    pub inner: MemoryStore,
    pub loads: AtomicUsize,
    pub evals: AtomicUsize,
    pub deletes: AtomicUsize,
    /// Every eval reports the script as unknown.
    pub always_noscript: AtomicBool,
    /// Every eval fails as if the connection dropped.
    pub fail_eval: AtomicBool,
    /// Every script registration fails.
    pub fail_load: AtomicBool,
}

impl TestStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn evals(&self) -> usize {
        self.evals.load(Ordering::SeqCst)
    }
}

fn connection_refused() -> SmartLimiterError {
    RedisError::from((ErrorKind::IoError, "connection refused")).into()
}

#[async_trait]
impl LimiterStore for TestStore {
    async fn delete(&self, key: &str) -> Result<(), SmartLimiterError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }

    async fn load_script(&self, body: &str) -> Result<String, SmartLimiterError> {
        self.loads.fetch_add(1, Ordering::SeqCst);

        if self.fail_load.load(Ordering::SeqCst) {
            return Err(connection_refused());
        }

        self.inner.load_script(body).await
    }

    async fn eval_script(
        &self,
        hash: &str,
        keys: &[String],
        args: &[i64],
    ) -> Result<ScriptReply, SmartLimiterError> {
        self.evals.fetch_add(1, Ordering::SeqCst);

        if self.fail_eval.load(Ordering::SeqCst) {
            return Err(connection_refused());
        }

        if self.always_noscript.load(Ordering::SeqCst) {
            return Err(SmartLimiterError::ScriptUnavailable(
                "NOSCRIPT No matching script".to_string(),
            ));
        }

        self.inner.eval_script(hash, keys, args).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SmartLimiterError> {
        self.inner.set(key, value, ttl).await
    }
}

pub(super) async fn limiter_with(store: Arc<dyn LimiterStore>) -> Limiter {
    Limiter::new(LimiterOptions::new(store)).await.unwrap()
}

pub(super) async fn memory_limiter() -> (Limiter, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let limiter = limiter_with(store.clone()).await;

    (limiter, store)
}
