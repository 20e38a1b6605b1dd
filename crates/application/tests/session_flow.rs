//! 会话流程：认证、单会话冲突、在线状态与屏蔽过滤、存储故障时放行

mod support;

use std::sync::{Arc, Mutex};

use application::{CacheError, ConnectionId, SessionCache};
use async_trait::async_trait;
use serde_json::json;
use support::TestHarness;
use uuid::Uuid;

/// 记录镜像调用顺序
#[derive(Default)]
struct RecordingCache {
    calls: Mutex<Vec<String>>,
}

impl RecordingCache {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionCache for RecordingCache {
    async fn store(&self, user_id: Uuid, connection_id: ConnectionId, _: u64) -> Result<(), CacheError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("store {} {}", user_id, connection_id));
        Ok(())
    }

    async fn remove(&self, user_id: Uuid) -> Result<(), CacheError> {
        self.calls.lock().unwrap().push(format!("remove {}", user_id));
        Ok(())
    }
}

#[tokio::test]
async fn messages_before_authentication_are_rejected() {
    let harness = TestHarness::new();
    let mut anonymous = harness.open();

    anonymous.send(json!({"type": "get_online_users"})).await;
    anonymous.expect_error("NOT_AUTHENTICATED");

    anonymous.send(json!({"type": "ping"})).await;
    anonymous.expect("pong");

    anonymous.send_raw("{not json").await;
    anonymous.expect_error("INVALID_MESSAGE");

    anonymous.send(json!({"type": "authenticate", "token": "forged"})).await;
    anonymous.expect_error("AUTHENTICATION_FAILED");
    let info = harness.core.connections.info(anonymous.id).unwrap();
    assert_eq!(info.failed_auth_attempts, 1);
    assert!(info.user.is_none());
}

#[tokio::test]
async fn second_login_closes_the_first_connection() {
    let harness = TestHarness::new();
    let alice = harness.user("alice").await;
    let bob = harness.user("bob").await;

    let mut first = harness.connect(&alice).await;
    let mut b = harness.connect(&bob).await;
    first.drain();

    let mut second = harness.connect(&alice).await;
    first.expect("session_conflict");
    let close = first.expect("close");
    assert_eq!(close["code"], application::CLOSE_SESSION_CONFLICT);
    assert_eq!(
        harness.core.sessions.lookup(alice.user_id),
        Some(second.id)
    );

    // 旧连接断开不会让用户显示为离线
    b.drain();
    first.disconnect().await;
    assert!(b.kinds().iter().all(|k| k != "user_offline"));

    second.send(json!({"type": "ping"})).await;
    second.expect("pong");
}

#[tokio::test]
async fn presence_skips_blocked_users() {
    let harness = TestHarness::new();
    let alice = harness.user("alice").await;
    let bob = harness.user("bob").await;
    let carol = harness.user("carol").await;
    harness.store.block(alice.user_id, bob.user_id).await;

    let mut b = harness.connect(&bob).await;
    let mut c = harness.connect(&carol).await;
    b.drain();
    c.drain();

    let mut a = harness.connect(&alice).await;
    assert!(b.kinds().is_empty());
    assert_eq!(c.expect("user_online")["user"]["userId"], alice.user_id.to_string());

    a.send(json!({"type": "get_online_users"})).await;
    let online = a.expect("online_users");
    let ids: Vec<_> = online["users"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["userId"].clone())
        .collect();
    assert_eq!(ids, vec![json!(carol.user_id)]);

    a.disconnect().await;
    assert_eq!(c.expect("user_offline")["userId"], alice.user_id.to_string());
    assert!(b.kinds().is_empty());
}

#[tokio::test]
async fn social_graph_outage_fails_open() {
    let harness = TestHarness::new();
    let alice = harness.user("alice").await;
    let bob = harness.user("bob").await;
    harness.store.block(alice.user_id, bob.user_id).await;

    let mut b = harness.connect(&bob).await;
    b.drain();

    harness.store.set_unavailable(true);
    let mut a = harness.connect(&alice).await;
    // 屏蔽列表不可读时按无屏蔽处理
    b.expect("user_online");

    // 写入仍然失败，错误细节不外泄
    a.send(json!({"type": "send_private_message", "recipientId": bob.user_id, "content": "hi"}))
        .await;
    let error = a.expect_error("INTERNAL_ERROR");
    assert!(!error["message"].as_str().unwrap().contains("memory store"));
}

#[tokio::test]
async fn takeover_closes_the_old_session_before_recording_the_new_one() {
    let cache = Arc::new(RecordingCache::default());
    let harness = TestHarness::with_session_cache(cache.clone());
    let alice = harness.user("alice").await;

    let mut first = harness.connect(&alice).await;
    let second = harness.connect(&alice).await;

    assert_eq!(
        cache.calls(),
        vec![
            format!("store {} {}", alice.user_id, first.id),
            format!("remove {}", alice.user_id),
            format!("store {} {}", alice.user_id, second.id),
        ]
    );
    assert_eq!(first.kinds(), vec!["session_conflict", "close"]);
    assert!(harness.core.connections.info(first.id).unwrap().user.is_none());
    assert_eq!(harness.core.sessions.lookup(alice.user_id), Some(second.id));
}

#[tokio::test]
async fn reauthenticating_as_someone_else_takes_the_old_identity_offline() {
    let harness = TestHarness::new();
    let alice = harness.user("alice").await;
    let bob = harness.user("bob").await;
    let carol = harness.user("carol").await;

    let mut c = harness.connect(&carol).await;
    let mut shared = harness.connect(&alice).await;
    c.drain();

    shared
        .send(json!({"type": "authenticate", "token": "token-bob"}))
        .await;
    assert_eq!(shared.expect("auth_success")["user"]["userId"], bob.user_id.to_string());

    let frames = c.drain();
    let kinds: Vec<_> = frames.iter().map(|f| f["type"].clone()).collect();
    assert_eq!(kinds, vec![json!("user_offline"), json!("user_online")]);
    assert_eq!(frames[0]["userId"], alice.user_id.to_string());
    assert_eq!(frames[1]["user"]["userId"], bob.user_id.to_string());

    assert_eq!(harness.core.sessions.lookup(alice.user_id), None);
    assert_eq!(harness.core.sessions.lookup(bob.user_id), Some(shared.id));
}
