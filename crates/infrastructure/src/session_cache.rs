//! Redis 会话镜像
//!
//! 键 `session:user:{user_id}`，值为连接 ID，带 TTL。只作跨实例的软提示。

use application::{CacheError, ConnectionId, SessionCache};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

const KEY_PREFIX: &str = "session:user:";

fn session_key(user_id: Uuid) -> String {
    format!("{KEY_PREFIX}{user_id}")
}

#[derive(Clone)]
pub struct RedisSessionCache {
    manager: ConnectionManager,
}

impl RedisSessionCache {
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        tracing::info!("Redis 会话镜像已连接");
        Ok(Self { manager })
    }
}

fn cache_err(err: redis::RedisError) -> CacheError {
    CacheError(err.to_string())
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn store(
        &self,
        user_id: Uuid,
        connection_id: ConnectionId,
        ttl_seconds: u64,
    ) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(session_key(user_id), connection_id.to_string(), ttl_seconds)
            .await
            .map_err(cache_err)
    }

    async fn remove(&self, user_id: Uuid) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(session_key(user_id))
            .await
            .map_err(cache_err)
    }
}
