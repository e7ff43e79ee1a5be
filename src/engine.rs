//! Script registration and evaluation against a [`LimiterStore`].

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    LimiterStore, ScriptReply, SmartLimiterError,
    script::{ESCALATION_SCRIPT, escalation_key},
};

/// Runs the escalation algorithm against a store, one atomic evaluation per call.
///
/// The engine caches the script hash returned at registration. When the store
/// has forgotten it (e.g. after a restart flushed the script cache), the engine
/// registers the body again, caches the new hash and retries exactly once.
pub struct CountingEngine {
    store: Arc<dyn LimiterStore>,
    script_hash: RwLock<Arc<str>>,
}

impl CountingEngine {
    /// Register the algorithm body with `store` and build an engine around it.
    pub async fn new(store: Arc<dyn LimiterStore>) -> Result<Self, SmartLimiterError> {
        let hash = store.load_script(ESCALATION_SCRIPT).await?;

        tracing::debug!(hash = %hash, "escalation script registered");

        Ok(Self {
            store,
            script_hash: RwLock::new(Arc::from(hash)),
        })
    }

    /// The store this engine evaluates against.
    pub fn store(&self) -> &Arc<dyn LimiterStore> {
        &self.store
    }

    /// Hash of the registered algorithm body.
    pub fn script_hash(&self) -> Arc<str> {
        self.script_hash.read().clone()
    }

    /// Admit one unit of work for `subject_key` under a flat, validated tier list.
    ///
    /// `tiers` must hold at least one `(limit, window_ms)` pair; callers are
    /// expected to have validated it.
    pub async fn evaluate(
        &self,
        subject_key: &str,
        now_ms: i64,
        tiers: &[i64],
    ) -> Result<ScriptReply, SmartLimiterError> {
        let keys = [subject_key.to_string(), escalation_key(subject_key)];

        let mut args = Vec::with_capacity(tiers.len() + 1);
        args.push(now_ms);
        args.extend_from_slice(tiers);

        let hash = self.script_hash();

        match self.store.eval_script(&hash, &keys, &args).await {
            Err(SmartLimiterError::ScriptUnavailable(reason)) => {
                tracing::warn!(
                    subject_key,
                    reason = %reason,
                    "escalation script missing from store, reloading"
                );

                let hash = self.reload().await?;

                match self.store.eval_script(&hash, &keys, &args).await {
                    Err(SmartLimiterError::ScriptUnavailable(reason)) => {
                        Err(SmartLimiterError::StoreFailure(format!(
                            "script still unavailable after reload: {reason}"
                        )))
                    }
                    result => result,
                }
            }
            result => result,
        }
    } // end method evaluate

    async fn reload(&self) -> Result<Arc<str>, SmartLimiterError> {
        let hash: Arc<str> = Arc::from(self.store.load_script(ESCALATION_SCRIPT).await?);
        *self.script_hash.write() = hash.clone();

        Ok(hash)
    }
}
