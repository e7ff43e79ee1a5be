//! The atomic counting/escalation algorithm and its reply contract.
//!
//! The algorithm runs server-side as a single Lua script, so the
//! read-modify-write of a subject's counter record is serialized by the store
//! across every process sharing it.

use redis::{FromRedisValue, RedisResult, Value};

/// Lua body of the fixed-window-with-escalation algorithm.
///
/// - `KEYS[1]`: subject key holding the counter record hash
///   (`ct` remaining, `lt` total, `dn` window ms, `rt` reset-at ms)
/// - `KEYS[2]`: escalation pointer key, `{KEYS[1]}:S`
/// - `ARGV[1]`: current epoch time in ms
/// - `ARGV[2..]`: flat tier list `limit, window_ms, limit, window_ms, ...`
///
/// Returns `{remaining, total, window_ms, reset_at_ms}`.
pub const ESCALATION_SCRIPT: &str = r#"
    local record_key = KEYS[1]
    local escalation_key = KEYS[2]

    local now_ms = tonumber(ARGV[1])
    local policy_count = (#ARGV - 1) / 2

    local res = {}
    local record = redis.call("HMGET", record_key, "ct", "lt", "dn", "rt")

    if record[1] then
        res[1] = tonumber(record[1]) - 1
        res[2] = tonumber(record[2])
        res[3] = tonumber(record[3]) or tonumber(ARGV[3])
        res[4] = tonumber(record[4]) or (now_ms + res[3])

        if res[1] >= 0 then
            redis.call("HINCRBY", record_key, "ct", -1)
        else
            res[1] = -1
        end

        if policy_count > 1 and res[1] == -1 then
            redis.call("INCR", escalation_key)
            redis.call("PEXPIRE", escalation_key, res[3] * 2)
        end
    else
        local index = 1
        if policy_count > 1 then
            index = tonumber(redis.call("GET", escalation_key)) or 1
            if index > policy_count then
                index = policy_count
            end
            if index < 1 then
                index = 1
            end
        end

        local total = tonumber(ARGV[index * 2])
        res[1] = total - 1
        res[2] = total
        res[3] = tonumber(ARGV[index * 2 + 1])
        res[4] = now_ms + res[3]

        redis.call("HSET", record_key, "ct", res[1], "lt", res[2], "dn", res[3], "rt", res[4])
        redis.call("PEXPIRE", record_key, res[3])

        if policy_count > 1 then
            redis.call("SET", escalation_key, index)
            redis.call("PEXPIRE", escalation_key, res[3] * 2)
        end
    end

    return res
"#;

/// Suffix tag of the escalation pointer key.
pub(crate) const ESCALATION_TAG: &str = "S";

/// Derive the escalation pointer key for a subject key.
///
/// Only the subject key sits inside the `{...}` hash tag, so a partitioned
/// store routes the pointer to the same shard as the counter record.
///
/// Co-location holds only while the subject key itself carries no `{...}`
/// section. A subject key such as `LIMIT:a{b}` hashes on `b` while its
/// pointer hashes on `LIMIT:a{b`, so Redis Cluster rejects the evaluation
/// with `CROSSSLOT`.
pub fn escalation_key(subject_key: &str) -> String {
    format!("{{{subject_key}}}:{ESCALATION_TAG}")
}

/// Content hash (SHA1, hex) a Redis server assigns to a script body.
pub(crate) fn script_hash(body: &str) -> String {
    redis::Script::new(body).get_hash().to_string()
}

/// Reply of one evaluation of [`ESCALATION_SCRIPT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptReply {
    /// Admissions left, `-1` when over quota.
    pub remaining: i64,
    /// Limit of the tier governing the window.
    pub total: i64,
    /// Window length in ms.
    pub window_ms: i64,
    /// Window end as epoch ms.
    pub reset_at_ms: i64,
}

impl FromRedisValue for ScriptReply {
    fn from_redis_value(v: &Value) -> RedisResult<Self> {
        let (remaining, total, window_ms, reset_at_ms): (i64, i64, i64, i64) =
            redis::from_redis_value(v)?;

        Ok(Self {
            remaining,
            total,
            window_ms,
            reset_at_ms,
        })
    }
}
