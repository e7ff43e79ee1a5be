use std::time::Duration;

use redis::{Cmd, ErrorKind, RedisError};

use crate::SmartLimiterError;

/// Map a Redis error, singling out an evicted script cache.
pub(crate) fn map_redis_error(err: RedisError) -> SmartLimiterError {
    if err.kind() == ErrorKind::NoScriptError {
        SmartLimiterError::ScriptUnavailable(err.to_string())
    } else {
        SmartLimiterError::RedisError(err)
    }
}

pub(crate) fn delete_cmd(key: &str) -> Cmd {
    let mut cmd = redis::cmd("DEL");
    cmd.arg(key);
    cmd
}

pub(crate) fn script_load_cmd(body: &str) -> Cmd {
    let mut cmd = redis::cmd("SCRIPT");
    cmd.arg("LOAD").arg(body);
    cmd
}

pub(crate) fn evalsha_cmd(hash: &str, keys: &[String], args: &[i64]) -> Cmd {
    let mut cmd = redis::cmd("EVALSHA");
    cmd.arg(hash).arg(keys.len()).arg(keys).arg(args);
    cmd
}

pub(crate) fn set_cmd(key: &str, value: &str, ttl: Duration) -> Cmd {
    // PX rejects 0, so sub-millisecond TTLs round up.
    let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value).arg("PX").arg(ttl_ms);
    cmd
}
