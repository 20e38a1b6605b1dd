//! 连接注册表
//!
//! 进程内唯一持有连接与 `userId -> connectionId` 映射的组件，
//! 会话注册表与广播扇出都只通过这里的访问方法读写共享状态。

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use domain::UserProfile;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// 发往连接写任务的帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// 会话冲突时关闭旧连接使用的关闭码
pub const CLOSE_SESSION_CONFLICT: u16 = 4001;
/// 认证超时
pub const CLOSE_AUTH_TIMEOUT: u16 = 4008;

#[derive(Debug)]
struct ConnectionEntry {
    sender: mpsc::UnboundedSender<OutboundFrame>,
    user: Option<UserProfile>,
    origin: Option<String>,
    connected_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    failed_auth_attempts: u32,
}

/// 连接快照（不含发送端）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub user: Option<UserProfile>,
    pub origin: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub failed_auth_attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionCounts {
    pub total: usize,
    pub authenticated: usize,
}

/// `bind_user` 的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    /// 被新绑定取代的同一用户的旧连接
    pub displaced: Option<ConnectionId>,
    /// 此连接上被替换掉的另一身份
    pub released: Option<UserProfile>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    sessions: DashMap<Uuid, ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        origin: Option<String>,
        sender: mpsc::UnboundedSender<OutboundFrame>,
        now: DateTime<Utc>,
    ) -> ConnectionId {
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            ConnectionEntry {
                sender,
                user: None,
                origin,
                connected_at: now,
                last_activity: now,
                failed_auth_attempts: 0,
            },
        );
        id
    }

    /// 移除连接；若它仍是该用户的当前会话，同时移除会话映射并返回用户
    pub fn unregister(&self, id: ConnectionId) -> Option<UserProfile> {
        let (_, entry) = self.connections.remove(&id)?;
        let user = entry.user?;
        self.sessions
            .remove_if(&user.user_id, |_, current| *current == id)
            .map(|_| user)
    }

    pub fn info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(&id).map(|entry| ConnectionInfo {
            id,
            user: entry.user.clone(),
            origin: entry.origin.clone(),
            connected_at: entry.connected_at,
            last_activity: entry.last_activity,
            failed_auth_attempts: entry.failed_auth_attempts,
        })
    }

    pub fn origin(&self, id: ConnectionId) -> Option<String> {
        self.connections.get(&id).and_then(|entry| entry.origin.clone())
    }

    pub fn user_of(&self, id: ConnectionId) -> Option<UserProfile> {
        self.connections.get(&id).and_then(|entry| entry.user.clone())
    }

    pub fn touch(&self, id: ConnectionId, now: DateTime<Utc>) {
        if let Some(mut entry) = self.connections.get_mut(&id) {
            entry.last_activity = now;
        }
    }

    pub fn record_failed_auth(&self, id: ConnectionId) -> u32 {
        match self.connections.get_mut(&id) {
            Some(mut entry) => {
                entry.failed_auth_attempts += 1;
                entry.failed_auth_attempts
            }
            None => 0,
        }
    }

    /// 把用户绑定到连接
    ///
    /// 调用方应先关闭该用户的旧连接再绑定；`displaced` 只在并发认证抢先写入时出现。
    pub fn bind_user(&self, id: ConnectionId, user: UserProfile) -> Binding {
        let Some(previous_user) = self
            .connections
            .get_mut(&id)
            .map(|mut entry| entry.user.replace(user.clone()))
        else {
            return Binding::default();
        };

        // 同一连接换了身份：旧身份仍是当前会话时释放并返回
        let released = previous_user
            .filter(|p| p.user_id != user.user_id)
            .and_then(|previous| {
                self.sessions
                    .remove_if(&previous.user_id, |_, current| *current == id)
                    .map(|_| previous)
            });

        let displaced = self
            .sessions
            .insert(user.user_id, id)
            .filter(|previous| *previous != id);
        Binding {
            displaced,
            released,
        }
    }

    /// 解除用户的会话并清除旧连接上的身份
    pub fn release_session(&self, user_id: Uuid, id: ConnectionId) {
        self.sessions.remove_if(&user_id, |_, current| *current == id);
        if let Some(mut entry) = self.connections.get_mut(&id) {
            if entry.user.as_ref().map(|u| u.user_id) == Some(user_id) {
                entry.user = None;
            }
        }
    }

    pub fn connection_for(&self, user_id: Uuid) -> Option<ConnectionId> {
        self.sessions.get(&user_id).map(|id| *id)
    }

    pub fn online_users(&self) -> Vec<UserProfile> {
        self.sessions
            .iter()
            .filter_map(|session| self.user_of(*session.value()))
            .collect()
    }

    pub fn online_user_ids(&self) -> Vec<Uuid> {
        self.sessions.iter().map(|session| *session.key()).collect()
    }

    pub fn counts(&self) -> ConnectionCounts {
        ConnectionCounts {
            total: self.connections.len(),
            authenticated: self.sessions.len(),
        }
    }

    /// 写入连接的发送队列；连接不存在或写任务已结束时返回 false
    pub fn send(&self, id: ConnectionId, frame: OutboundFrame) -> bool {
        match self.connections.get(&id) {
            Some(entry) => entry.sender.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn close(&self, id: ConnectionId, code: u16, reason: impl Into<String>) -> bool {
        self.send(
            id,
            OutboundFrame::Close {
                code,
                reason: reason.into(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_connection() -> (
        ConnectionRegistry,
        ConnectionId,
        mpsc::UnboundedReceiver<OutboundFrame>,
    ) {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.register(Some("10.0.0.1".into()), tx, Utc::now());
        (registry, id, rx)
    }

    #[test]
    fn bind_returns_previous_connection() {
        let (registry, first, _rx1) = registry_with_connection();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let second = registry.register(None, tx2, Utc::now());
        let user = UserProfile::new(Uuid::new_v4(), "alice");

        assert_eq!(registry.bind_user(first, user.clone()), Binding::default());
        assert_eq!(registry.bind_user(second, user.clone()).displaced, Some(first));
        assert_eq!(registry.connection_for(user.user_id), Some(second));

        // 旧连接断开不影响新会话
        assert_eq!(registry.unregister(first), None);
        assert_eq!(registry.connection_for(user.user_id), Some(second));
        assert_eq!(registry.unregister(second), Some(user));
        assert_eq!(registry.counts(), ConnectionCounts::default());
    }

    #[test]
    fn rebinding_to_another_user_releases_the_old_identity() {
        let (registry, id, _rx) = registry_with_connection();
        let alice = UserProfile::new(Uuid::new_v4(), "alice");
        let bob = UserProfile::new(Uuid::new_v4(), "bob");

        registry.bind_user(id, alice.clone());
        let binding = registry.bind_user(id, bob.clone());
        assert_eq!(binding.released, Some(alice.clone()));
        assert_eq!(binding.displaced, None);
        assert_eq!(registry.connection_for(alice.user_id), None);
        assert_eq!(registry.connection_for(bob.user_id), Some(id));

        // 同一身份重复认证不释放任何会话
        assert_eq!(registry.bind_user(id, bob), Binding::default());
    }

    #[test]
    fn failed_auth_counter_increments() {
        let (registry, id, _rx) = registry_with_connection();
        assert_eq!(registry.record_failed_auth(id), 1);
        assert_eq!(registry.record_failed_auth(id), 2);
        assert_eq!(registry.info(id).unwrap().failed_auth_attempts, 2);
        assert_eq!(registry.origin(id).as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn send_reaches_writer_queue() {
        let (registry, id, mut rx) = registry_with_connection();
        assert!(registry.send(id, OutboundFrame::Text("hello".into())));
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Text("hello".into()));
        assert!(!registry.send(Uuid::new_v4(), OutboundFrame::Text("x".into())));
    }
}
