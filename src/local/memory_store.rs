use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{
    LimiterStore, ScriptReply, SmartLimiterError,
    script::{ESCALATION_SCRIPT, ESCALATION_TAG, escalation_key, script_hash},
};

// Stand-in expiry for TTLs too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl_ms: i64, now: Instant) -> Self {
        let ttl = Duration::from_millis(ttl_ms.max(0) as u64);

        Self {
            value,
            expires_at: now.checked_add(ttl).unwrap_or(now + FAR_FUTURE),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Copy)]
struct CounterRecord {
    remaining: i64,
    total: i64,
    window_ms: i64,
    reset_at_ms: i64,
}

/// State of one subject: its counter record and escalation pointer share an
/// entry, so one shard lock covers the whole read-modify-write.
#[derive(Debug, Default)]
struct Slot {
    record: Option<Expiring<CounterRecord>>,
    escalation: Option<Expiring<i64>>,
}

impl Slot {
    fn evict_expired(&mut self, now: Instant) {
        if self.record.as_ref().is_some_and(|record| !record.is_live(now)) {
            self.record = None;
        }
        if self.escalation.as_ref().is_some_and(|pointer| !pointer.is_live(now)) {
            self.escalation = None;
        }
    }

    fn is_empty(&self) -> bool {
        self.record.is_none() && self.escalation.is_none()
    }
}

/// Subject whose escalation pointer is stored at `key`, if `key` has the
/// `{subject}:S` layout.
fn pointer_subject(key: &str) -> Option<&str> {
    key.strip_prefix('{')
        .and_then(|rest| rest.strip_suffix(ESCALATION_TAG))
        .and_then(|rest| rest.strip_suffix("}:"))
}

/// In-process store that runs the escalation algorithm natively.
///
/// State lives in this process only, so limits are not shared with other
/// processes. Suitable for single-instance deployments and tests.
///
/// # Semantics
///
/// - Scripts are tracked by the same SHA1 content hash Redis assigns, but only
///   [`ESCALATION_SCRIPT`](crate::ESCALATION_SCRIPT) can be evaluated.
/// - Keys expire lazily when touched; [`run_cleanup_loop`](Self::run_cleanup_loop)
///   sweeps subjects nobody touches anymore.
/// - [`flush_scripts`](Self::flush_scripts) forgets registered scripts, the
///   way a restarted Redis would.
#[derive(Debug)]
pub struct MemoryStore {
    escalation_hash: String,
    scripts: DashMap<String, Arc<str>>,
    slots: DashMap<String, Slot>,
    values: DashMap<String, Expiring<String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            escalation_hash: script_hash(ESCALATION_SCRIPT),
            scripts: DashMap::new(),
            slots: DashMap::new(),
            values: DashMap::new(),
        }
    }

    /// Forget every registered script.
    pub fn flush_scripts(&self) {
        self.scripts.clear();
    }

    /// Number of subjects with live or not-yet-swept state.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store holds no subject state.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current escalation tier index for a subject key, if one is set.
    pub fn escalation_index(&self, subject_key: &str) -> Option<i64> {
        let now = Instant::now();

        self.slots.get(subject_key).and_then(|slot| {
            slot.escalation
                .as_ref()
                .filter(|pointer| pointer.is_live(now))
                .map(|pointer| pointer.value)
        })
    }

    /// Value stored with [`LimiterStore::set`], if still live.
    pub fn value(&self, key: &str) -> Option<String> {
        let now = Instant::now();

        self.values
            .get(key)
            .filter(|value| value.is_live(now))
            .map(|value| value.value.clone())
    }

    /// Drop expired state. Returns how many subjects were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();

        self.slots.retain(|_, slot| {
            slot.evict_expired(now);
            !slot.is_empty()
        });
        self.values.retain(|_, value| value.is_live(now));

        before.saturating_sub(self.slots.len())
    } // end method cleanup

    /// Periodically call [`cleanup`](Self::cleanup) on a tokio task.
    ///
    /// The task holds a weak handle and stops once the store is dropped.
    /// Must be called from within a tokio runtime.
    pub fn run_cleanup_loop(self: &Arc<Self>, interval: Duration) {
        let store = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            // discard the first tick
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let Some(store) = store.upgrade() else {
                    break;
                };

                let removed = store.cleanup();
                if removed > 0 {
                    tracing::debug!(removed, "memory store cleanup removed expired subjects");
                }
            }
        });
    } // end method run_cleanup_loop

    fn escalate(slot: &mut Slot, now_ms: i64, tiers: &[i64], now: Instant) -> ScriptReply {
        let policy_count = (tiers.len() / 2) as i64;

        if let Some(record) = slot.record.as_mut() {
            let counter = &mut record.value;

            let mut remaining = counter.remaining.saturating_sub(1);
            if remaining >= 0 {
                counter.remaining = remaining;
            } else {
                remaining = -1;
            }

            let reply = ScriptReply {
                remaining,
                total: counter.total,
                window_ms: counter.window_ms,
                reset_at_ms: counter.reset_at_ms,
            };

            if policy_count > 1 && remaining == -1 {
                let index = slot
                    .escalation
                    .as_ref()
                    .map(|pointer| pointer.value)
                    .unwrap_or(0)
                    .saturating_add(1);
                slot.escalation = Some(Expiring::new(
                    index,
                    reply.window_ms.saturating_mul(2),
                    now,
                ));
            }

            return reply;
        }

        let index = if policy_count > 1 {
            slot.escalation
                .as_ref()
                .map(|pointer| pointer.value)
                .unwrap_or(1)
                .clamp(1, policy_count)
        } else {
            1
        };

        let tier = ((index - 1) * 2) as usize;
        let total = tiers[tier];
        let window_ms = tiers[tier + 1];

        let counter = CounterRecord {
            remaining: total.saturating_sub(1),
            total,
            window_ms,
            reset_at_ms: now_ms.saturating_add(window_ms),
        };
        slot.record = Some(Expiring::new(counter, window_ms, now));

        if policy_count > 1 {
            slot.escalation = Some(Expiring::new(index, window_ms.saturating_mul(2), now));
        }

        ScriptReply {
            remaining: counter.remaining,
            total: counter.total,
            window_ms: counter.window_ms,
            reset_at_ms: counter.reset_at_ms,
        }
    } // end method escalate
}

#[async_trait]
impl LimiterStore for MemoryStore {
    async fn delete(&self, key: &str) -> Result<(), SmartLimiterError> {
        self.values.remove(key);

        // A key names a counter record first; hash-tagged prefixes can make a
        // record key look like another subject's pointer.
        let had_record = self
            .slots
            .get_mut(key)
            .is_some_and(|mut slot| slot.record.take().is_some());

        if had_record {
            self.slots.remove_if(key, |_, slot| slot.is_empty());
            return Ok(());
        }

        if let Some(subject) = pointer_subject(key) {
            self.slots.remove_if_mut(subject, |_, slot| {
                slot.escalation = None;
                slot.is_empty()
            });
        }

        Ok(())
    }

    async fn load_script(&self, body: &str) -> Result<String, SmartLimiterError> {
        let hash = script_hash(body);
        self.scripts.insert(hash.clone(), Arc::from(body));

        Ok(hash)
    }

    async fn eval_script(
        &self,
        hash: &str,
        keys: &[String],
        args: &[i64],
    ) -> Result<ScriptReply, SmartLimiterError> {
        if !self.scripts.contains_key(hash) {
            return Err(SmartLimiterError::ScriptUnavailable(
                "NOSCRIPT No matching script. Please use EVAL.".to_string(),
            ));
        }

        if hash != self.escalation_hash {
            return Err(SmartLimiterError::StoreFailure(format!(
                "memory store cannot evaluate script {hash}"
            )));
        }

        let [subject_key, pointer_key] = keys else {
            return Err(SmartLimiterError::StoreFailure(format!(
                "escalation script takes 2 keys, got {}",
                keys.len()
            )));
        };

        if *pointer_key != escalation_key(subject_key) {
            return Err(SmartLimiterError::StoreFailure(
                "escalation pointer key must share the subject's slot".to_string(),
            ));
        }

        let Some((now_ms, tiers)) = args.split_first() else {
            return Err(SmartLimiterError::StoreFailure(
                "escalation script takes a timestamp argument".to_string(),
            ));
        };

        if tiers.is_empty() || tiers.len() % 2 == 1 {
            return Err(SmartLimiterError::StoreFailure(format!(
                "escalation script takes paired tier arguments, got {}",
                tiers.len()
            )));
        }

        let now = Instant::now();
        let mut slot = self.slots.entry(subject_key.clone()).or_default();
        slot.evict_expired(now);

        Ok(Self::escalate(&mut slot, *now_ms, tiers, now))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SmartLimiterError> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.values.insert(
            key.to_string(),
            Expiring::new(value.to_string(), ttl_ms, Instant::now()),
        );

        Ok(())
    }
}
