//! 测试支撑：内存存储 + 手动时钟 + 静态令牌，直接驱动消息路由

#![allow(dead_code)]

use std::sync::Arc;

use application::{
    ConnectionId, ManualClock, MemoryStore, MessagingCore, MessagingDependencies,
    MessagingSettings, NoopSessionCache, OutboundFrame, SessionCache, StaticTokenOracle,
};
use chrono::{TimeZone, Utc};
use domain::UserProfile;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct TestHarness {
    pub core: MessagingCore,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub oracle: Arc<StaticTokenOracle>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(MessagingSettings::default())
    }

    pub fn with_settings(settings: MessagingSettings) -> Self {
        Self::build(settings, Arc::new(NoopSessionCache))
    }

    pub fn with_session_cache(cache: Arc<dyn SessionCache>) -> Self {
        Self::build(MessagingSettings::default(), cache)
    }

    fn build(settings: MessagingSettings, cache: Arc<dyn SessionCache>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let oracle = Arc::new(StaticTokenOracle::new());
        let deps = MessagingDependencies::from_store(store.clone(), oracle.clone())
            .with_clock(clock.clone())
            .with_session_cache(cache);
        let core = MessagingCore::new(deps, settings);
        Self {
            core,
            store,
            clock,
            oracle,
        }
    }

    /// 注册用户并签发令牌 `token-{username}`
    pub async fn user(&self, username: &str) -> UserProfile {
        let user = UserProfile::new(Uuid::new_v4(), username);
        self.store.add_user(user.clone()).await;
        self.oracle
            .issue(format!("token-{}", username), user.clone())
            .await;
        user
    }

    /// 未认证的连接
    pub fn open(&self) -> TestClient {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.core.connections.register(None, tx, self.clock_now());
        TestClient {
            id,
            user: None,
            rx,
            core: self.core.clone(),
        }
    }

    /// 建立连接并完成认证，清空认证期间收到的帧
    pub async fn connect(&self, user: &UserProfile) -> TestClient {
        let mut client = self.open();
        client
            .send(json!({"type": "authenticate", "token": format!("token-{}", user.username)}))
            .await;
        client.expect("auth_success");
        client.drain();
        client.user = Some(user.clone());
        client
    }

    pub fn clock_now(&self) -> chrono::DateTime<Utc> {
        use application::Clock;
        self.clock.now()
    }
}

pub struct TestClient {
    pub id: ConnectionId,
    pub user: Option<UserProfile>,
    rx: mpsc::UnboundedReceiver<OutboundFrame>,
    core: MessagingCore,
}

impl TestClient {
    pub fn user_id(&self) -> Uuid {
        self.user.as_ref().map(|u| u.user_id).expect("client is authenticated")
    }

    pub async fn send(&self, message: Value) {
        self.core.router.dispatch(self.id, &message.to_string()).await;
    }

    pub async fn send_raw(&self, raw: &str) {
        self.core.router.dispatch(self.id, raw).await;
    }

    pub async fn disconnect(&self) {
        self.core.router.disconnect(self.id).await;
    }

    /// 下一帧；关闭帧表示为 `{"type": "close", "code": .., "reason": ..}`
    pub fn next(&mut self) -> Option<Value> {
        match self.rx.try_recv().ok()? {
            OutboundFrame::Text(text) => {
                Some(serde_json::from_str(&text).expect("outbound frame is json"))
            }
            OutboundFrame::Close { code, reason } => {
                Some(json!({"type": "close", "code": code, "reason": reason}))
            }
        }
    }

    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next() {
            frames.push(frame);
        }
        frames
    }

    /// 跳过其他帧直到遇到指定类型
    pub fn expect(&mut self, kind: &str) -> Value {
        let mut seen = Vec::new();
        while let Some(frame) = self.next() {
            if frame["type"] == kind {
                return frame;
            }
            seen.push(frame["type"].clone());
        }
        panic!("expected `{}` frame, saw {:?}", kind, seen);
    }

    pub fn expect_error(&mut self, code: &str) -> Value {
        let frame = self.expect("error");
        assert_eq!(frame["code"], code, "unexpected error frame: {}", frame);
        frame
    }

    pub fn kinds(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|f| f["type"].as_str().map(str::to_string))
            .collect()
    }
}
