use std::time::Duration;

use async_trait::async_trait;
use redis::{
    cluster::ClusterClient,
    cluster_async::ClusterConnection,
    cluster_routing::{MultipleNodeRoutingInfo, ResponsePolicy, RoutingInfo},
};

use crate::{
    LimiterStore, ScriptReply, SmartLimiterError,
    redis::common::{delete_cmd, evalsha_cmd, map_redis_error, script_load_cmd, set_cmd},
};

/// Store backed by a Redis Cluster.
///
/// Commands are routed by key slot. Script registration is the exception: a
/// script hash is only usable on nodes that loaded it, so
/// [`load_script`](LimiterStore::load_script) sends `SCRIPT LOAD` to every
/// primary and fails unless all of them accept it.
#[derive(Clone)]
pub struct RedisClusterStore {
    connection: ClusterConnection,
}

impl RedisClusterStore {
    /// Open an async cluster connection from `client`.
    pub async fn from_client(client: ClusterClient) -> Result<Self, SmartLimiterError> {
        let connection = client.get_async_connection().await?;

        Ok(Self { connection })
    }

    /// Wrap an existing cluster connection.
    pub fn from_connection(connection: ClusterConnection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl LimiterStore for RedisClusterStore {
    async fn delete(&self, key: &str) -> Result<(), SmartLimiterError> {
        let mut connection = self.connection.clone();

        let _: i64 = delete_cmd(key)
            .query_async(&mut connection)
            .await
            .map_err(map_redis_error)?;

        Ok(())
    }

    async fn load_script(&self, body: &str) -> Result<String, SmartLimiterError> {
        let mut connection = self.connection.clone();

        let routing = RoutingInfo::MultiNode((
            MultipleNodeRoutingInfo::AllMasters,
            Some(ResponsePolicy::AllSucceeded),
        ));

        let value = connection
            .route_command(&script_load_cmd(body), routing)
            .await
            .map_err(map_redis_error)?;

        // Every primary hashes the same body, so any one reply stands for all.
        let hash: String = redis::from_redis_value(&value)?;

        tracing::debug!(hash = %hash, "script registered on all cluster primaries");

        Ok(hash)
    }

    async fn eval_script(
        &self,
        hash: &str,
        keys: &[String],
        args: &[i64],
    ) -> Result<ScriptReply, SmartLimiterError> {
        let mut connection = self.connection.clone();

        let reply: ScriptReply = evalsha_cmd(hash, keys, args)
            .query_async(&mut connection)
            .await
            .map_err(map_redis_error)?;

        Ok(reply)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SmartLimiterError> {
        let mut connection = self.connection.clone();

        let _: () = set_cmd(key, value, ttl)
            .query_async(&mut connection)
            .await
            .map_err(map_redis_error)?;

        Ok(())
    }
}
