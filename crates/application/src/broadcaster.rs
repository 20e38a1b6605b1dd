//! 广播扇出
//!
//! 把一个事件序列化一次，投递给一组用户当前的在线连接。离线用户直接跳过，不排队。

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::connection::{ConnectionId, ConnectionRegistry, OutboundFrame};
use crate::protocol::{OutboundEnvelope, ServerEvent};

#[derive(Clone)]
pub struct BroadcastFanout {
    connections: Arc<ConnectionRegistry>,
    clock: Arc<dyn Clock>,
}

impl BroadcastFanout {
    pub fn new(connections: Arc<ConnectionRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { connections, clock }
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    fn encode(&self, event: &ServerEvent) -> Option<String> {
        match OutboundEnvelope::encode(event, self.clock.now()) {
            Ok(text) => Some(text),
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize outbound event");
                None
            }
        }
    }

    pub fn send_to_connection(&self, connection_id: ConnectionId, event: &ServerEvent) -> bool {
        self.encode(event)
            .map(|text| self.connections.send(connection_id, OutboundFrame::Text(text)))
            .unwrap_or(false)
    }

    /// 投递给单个用户；不在线返回 false
    pub fn send_to_user(&self, user_id: Uuid, event: &ServerEvent) -> bool {
        match self.connections.connection_for(user_id) {
            Some(connection_id) => self.send_to_connection(connection_id, event),
            None => false,
        }
    }

    /// 投递给一组用户（跳过 `except`），返回成功投递的数量
    pub fn send_to_users<I>(&self, user_ids: I, event: &ServerEvent, except: Option<Uuid>) -> usize
    where
        I: IntoIterator<Item = Uuid>,
    {
        let Some(text) = self.encode(event) else {
            return 0;
        };

        let mut seen = HashSet::new();
        user_ids
            .into_iter()
            .filter(|user_id| Some(*user_id) != except && seen.insert(*user_id))
            .filter_map(|user_id| self.connections.connection_for(user_id))
            .filter(|connection_id| {
                self.connections
                    .send(*connection_id, OutboundFrame::Text(text.clone()))
            })
            .count()
    }

    /// 投递给全部在线用户，排除 `except` 与 `excluded` 中的用户
    pub fn broadcast_online(
        &self,
        event: &ServerEvent,
        except: Option<Uuid>,
        excluded: &HashSet<Uuid>,
    ) -> usize {
        let targets = self
            .connections
            .online_user_ids()
            .into_iter()
            .filter(|user_id| !excluded.contains(user_id));
        self.send_to_users(targets, event, except)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use chrono::Utc;
    use domain::UserProfile;
    use tokio::sync::mpsc;

    #[test]
    fn offline_members_are_skipped() {
        let registry = Arc::new(ConnectionRegistry::new());
        let fanout = BroadcastFanout::new(registry.clone(), Arc::new(SystemClock));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let online = UserProfile::new(Uuid::new_v4(), "online");
        let connection = registry.register(None, tx, Utc::now());
        registry.bind_user(connection, online.clone());

        let offline = Uuid::new_v4();
        let event = ServerEvent::UserOffline { user_id: offline };
        let delivered = fanout.send_to_users(vec![online.user_id, offline, online.user_id], &event, None);

        assert_eq!(delivered, 1);
        assert!(matches!(rx.try_recv(), Ok(OutboundFrame::Text(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_respects_exclusions() {
        let registry = Arc::new(ConnectionRegistry::new());
        let fanout = BroadcastFanout::new(registry.clone(), Arc::new(SystemClock));

        let mut receivers = Vec::new();
        let mut users = Vec::new();
        for name in ["a", "b", "c"] {
            let (tx, rx) = mpsc::unbounded_channel();
            let user = UserProfile::new(Uuid::new_v4(), name);
            let connection = registry.register(None, tx, Utc::now());
            registry.bind_user(connection, user.clone());
            receivers.push(rx);
            users.push(user);
        }

        let excluded: HashSet<Uuid> = [users[2].user_id].into_iter().collect();
        let event = ServerEvent::UserOnline {
            user: users[0].clone(),
        };
        let delivered = fanout.broadcast_online(&event, Some(users[0].user_id), &excluded);
        assert_eq!(delivered, 1);
        assert!(receivers[0].try_recv().is_err());
        assert!(receivers[1].try_recv().is_ok());
        assert!(receivers[2].try_recv().is_err());
    }
}
