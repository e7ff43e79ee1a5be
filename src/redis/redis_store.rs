use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use redis::{Client, aio::ConnectionManager};

use crate::{
    LimiterStore, ScriptReply, SmartLimiterError,
    redis::common::{delete_cmd, evalsha_cmd, map_redis_error, script_load_cmd, set_cmd},
};

/// Store backed by a single Redis node.
///
/// Holds one or more [`redis::aio::ConnectionManager`]s and hands them out
/// round-robin; each manager reconnects on its own after a dropped connection.
pub struct RedisStore {
    connection_managers: Arc<Vec<ConnectionManager>>,
    track_index: AtomicUsize,
}

impl RedisStore {
    /// Create a store with a single connection manager.
    pub async fn default_from_client(client: Client) -> Result<Self, SmartLimiterError> {
        Self::from_client(client, 1).await
    }

    /// Create a store with `connection_count` connection managers.
    pub async fn from_client(
        client: Client,
        connection_count: usize,
    ) -> Result<Self, SmartLimiterError> {
        if connection_count == 0 {
            return Err(SmartLimiterError::Configuration(
                "connection count must be > 0".to_string(),
            ));
        }

        let mut connection_managers = Vec::with_capacity(connection_count);

        for _ in 0..connection_count {
            connection_managers.push(client.get_connection_manager().await?);
        }

        Ok(Self::from_connection_managers(connection_managers))
    }

    /// Wrap connection managers that were built elsewhere.
    ///
    /// An empty vector is rejected by [`from_client`](Self::from_client) but
    /// cannot be checked here, so callers must pass at least one manager.
    pub fn from_connection_managers(connection_managers: Vec<ConnectionManager>) -> Self {
        Self {
            connection_managers: Arc::new(connection_managers),
            track_index: AtomicUsize::new(0),
        }
    }

    fn get(&self) -> Result<ConnectionManager, SmartLimiterError> {
        let len = self.connection_managers.len();
        if len == 0 {
            return Err(SmartLimiterError::Configuration(
                "redis store has no connection managers".to_string(),
            ));
        }

        let index = self.track_index.fetch_add(1, Ordering::Relaxed);
        Ok(self.connection_managers[index % len].clone())
    } // end method get
}

impl Clone for RedisStore {
    fn clone(&self) -> Self {
        Self {
            connection_managers: self.connection_managers.clone(),
            track_index: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LimiterStore for RedisStore {
    async fn delete(&self, key: &str) -> Result<(), SmartLimiterError> {
        let mut connection_manager = self.get()?;

        let _: i64 = delete_cmd(key)
            .query_async(&mut connection_manager)
            .await
            .map_err(map_redis_error)?;

        Ok(())
    }

    async fn load_script(&self, body: &str) -> Result<String, SmartLimiterError> {
        let mut connection_manager = self.get()?;

        let hash: String = script_load_cmd(body)
            .query_async(&mut connection_manager)
            .await
            .map_err(map_redis_error)?;

        Ok(hash)
    }

    async fn eval_script(
        &self,
        hash: &str,
        keys: &[String],
        args: &[i64],
    ) -> Result<ScriptReply, SmartLimiterError> {
        let mut connection_manager = self.get()?;

        let reply: ScriptReply = evalsha_cmd(hash, keys, args)
            .query_async(&mut connection_manager)
            .await
            .map_err(map_redis_error)?;

        Ok(reply)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SmartLimiterError> {
        let mut connection_manager = self.get()?;

        let _: () = set_cmd(key, value, ttl)
            .query_async(&mut connection_manager)
            .await
            .map_err(map_redis_error)?;

        Ok(())
    }
}
