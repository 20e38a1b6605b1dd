//! 会话注册表
//!
//! 每个用户最多一个活跃会话。新的认证成功后，旧连接先收到 `session_conflict`
//! 并被关闭，然后才记录新会话。外部缓存只是软镜像，失败时退化为纯内存。

use std::sync::Arc;

use async_trait::async_trait;
use domain::UserProfile;
use thiserror::Error;
use uuid::Uuid;

use crate::authorization::AuthorizationGate;
use crate::broadcaster::BroadcastFanout;
use crate::connection::{ConnectionId, ConnectionRegistry, CLOSE_SESSION_CONFLICT};
use crate::error::ApplicationError;
use crate::protocol::ServerEvent;

/// 认证失败原因
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    Expired,
    #[error("unknown user")]
    UnknownUser,
    #[error("authentication service unavailable: {0}")]
    Unavailable(String),
}

/// 外部认证服务：校验令牌与来源地址，返回用户身份
#[async_trait]
pub trait AuthenticationOracle: Send + Sync {
    async fn verify(&self, token: &str, origin: Option<&str>) -> Result<UserProfile, AuthFailure>;
}

#[derive(Debug, Error)]
#[error("session cache error: {0}")]
pub struct CacheError(pub String);

/// 会话镜像（横向扩展时的软提示，不是事实来源）
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn store(
        &self,
        user_id: Uuid,
        connection_id: ConnectionId,
        ttl_seconds: u64,
    ) -> Result<(), CacheError>;

    async fn remove(&self, user_id: Uuid) -> Result<(), CacheError>;
}

/// 未配置缓存时使用
#[derive(Debug, Default)]
pub struct NoopSessionCache;

#[async_trait]
impl SessionCache for NoopSessionCache {
    async fn store(&self, _: Uuid, _: ConnectionId, _: u64) -> Result<(), CacheError> {
        Ok(())
    }

    async fn remove(&self, _: Uuid) -> Result<(), CacheError> {
        Ok(())
    }
}

pub struct SessionRegistry {
    connections: Arc<ConnectionRegistry>,
    oracle: Arc<dyn AuthenticationOracle>,
    cache: Arc<dyn SessionCache>,
    gate: AuthorizationGate,
    fanout: BroadcastFanout,
    session_ttl_seconds: u64,
}

impl SessionRegistry {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        oracle: Arc<dyn AuthenticationOracle>,
        cache: Arc<dyn SessionCache>,
        gate: AuthorizationGate,
        fanout: BroadcastFanout,
        session_ttl_seconds: u64,
    ) -> Self {
        Self {
            connections,
            oracle,
            cache,
            gate,
            fanout,
            session_ttl_seconds,
        }
    }

    /// 认证连接。失败只计数，不关闭连接
    pub async fn authenticate(
        &self,
        connection_id: ConnectionId,
        token: &str,
    ) -> Result<UserProfile, ApplicationError> {
        let token = token.trim();
        let result = if token.is_empty() {
            Err(AuthFailure::MissingToken)
        } else {
            let origin = self.connections.origin(connection_id);
            self.oracle.verify(token, origin.as_deref()).await
        };

        let user = match result {
            Ok(user) => user,
            Err(failure) => {
                let attempts = self.connections.record_failed_auth(connection_id);
                tracing::warn!(
                    connection_id = %connection_id,
                    attempts,
                    reason = %failure,
                    "authentication failed"
                );
                return Err(ApplicationError::Authentication(failure.to_string()));
            }
        };

        // 先关闭旧连接，再记录新会话
        if let Some(previous) = self
            .connections
            .connection_for(user.user_id)
            .filter(|previous| *previous != connection_id)
        {
            self.supersede(user.user_id, previous).await;
        }
        let binding = self.connections.bind_user(connection_id, user.clone());
        if let Some(displaced) = binding.displaced {
            self.supersede(user.user_id, displaced).await;
        }
        if let Some(released) = binding.released {
            tracing::info!(user_id = %released.user_id, connection_id = %connection_id, "连接切换身份，旧身份下线");
            self.forget(released.user_id).await;
            self.announce_offline(released.user_id).await;
        }

        if let Err(err) = self
            .cache
            .store(user.user_id, connection_id, self.session_ttl_seconds)
            .await
        {
            tracing::warn!(user_id = %user.user_id, error = %err, "会话镜像写入失败，退化为内存模式");
        }

        let online_users = self.online_users_for(user.user_id).await;
        self.fanout.send_to_connection(
            connection_id,
            &ServerEvent::AuthSuccess {
                user: user.clone(),
                online_users,
            },
        );

        let excluded = self.gate.blocked_set(user.user_id).await;
        let notified = self.fanout.broadcast_online(
            &ServerEvent::UserOnline { user: user.clone() },
            Some(user.user_id),
            &excluded,
        );
        tracing::info!(user_id = %user.user_id, username = %user.username, notified, "用户上线");

        Ok(user)
    }

    pub fn lookup(&self, user_id: Uuid) -> Option<ConnectionId> {
        self.connections.connection_for(user_id)
    }

    pub fn user_of(&self, connection_id: ConnectionId) -> Option<UserProfile> {
        self.connections.user_of(connection_id)
    }

    /// 强制下线用户
    pub async fn evict(&self, user_id: Uuid, reason: &str) -> bool {
        let Some(connection_id) = self.connections.connection_for(user_id) else {
            return false;
        };
        self.connections
            .close(connection_id, CLOSE_SESSION_CONFLICT, reason);
        self.connections.release_session(user_id, connection_id);
        self.forget(user_id).await;
        true
    }

    /// 连接断开：仅当它仍是当前会话时广播下线
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let Some(user) = self.connections.unregister(connection_id) else {
            return;
        };
        self.forget(user.user_id).await;
        self.announce_offline(user.user_id).await;
        tracing::info!(user_id = %user.user_id, "用户下线");
    }

    /// 通知旧连接会话冲突并关闭它，同时撤销旧会话的镜像
    async fn supersede(&self, user_id: Uuid, previous: ConnectionId) {
        tracing::info!(user_id = %user_id, previous = %previous, "会话冲突，关闭旧连接");
        self.fanout.send_to_connection(
            previous,
            &ServerEvent::SessionConflict {
                message: "You have signed in from another location".to_string(),
            },
        );
        self.connections
            .close(previous, CLOSE_SESSION_CONFLICT, "session_conflict");
        self.connections.release_session(user_id, previous);
        self.forget(user_id).await;
    }

    async fn announce_offline(&self, user_id: Uuid) {
        let excluded = self.gate.blocked_set(user_id).await;
        self.fanout.broadcast_online(
            &ServerEvent::UserOffline { user_id },
            Some(user_id),
            &excluded,
        );
    }

    /// 在线用户列表，排除自己与存在屏蔽关系的用户
    pub async fn online_users_for(&self, viewer: Uuid) -> Vec<UserProfile> {
        let excluded = self.gate.blocked_set(viewer).await;
        self.connections
            .online_users()
            .into_iter()
            .filter(|user| user.user_id != viewer && !excluded.contains(&user.user_id))
            .collect()
    }

    async fn forget(&self, user_id: Uuid) {
        if let Err(err) = self.cache.remove(user_id).await {
            tracing::warn!(user_id = %user_id, error = %err, "会话镜像删除失败，忽略");
        }
    }
}
