#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{MemoryStore, MessagingCore, MessagingDependencies, MessagingSettings};
use domain::UserProfile;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;
use web_api::{router, AppState, ConnectionSettings, JwtConfig, JwtService};

pub const PROGRESSION_TOKEN: &str = "progression-sync-token-for-tests";

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub jwt: Arc<JwtService>,
    pub core: MessagingCore,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(ConnectionSettings::default(), 1024 * 1024).await
    }

    pub async fn start_with(connection: ConnectionSettings, max_body_bytes: usize) -> Self {
        let store = Arc::new(MemoryStore::new());
        let jwt = Arc::new(JwtService::new(JwtConfig {
            secret: "web-api-test-secret-key-with-enough-length".to_string(),
            expiration_hours: 1,
        }));
        let core = MessagingCore::new(
            MessagingDependencies::from_store(store.clone(), jwt.clone()),
            MessagingSettings::default(),
        );
        let state = AppState::new(core.clone(), PROGRESSION_TOKEN)
            .with_max_body_bytes(max_body_bytes)
            .with_connection_settings(connection);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state);

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
        });

        Self {
            addr,
            store,
            jwt,
            core,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 注册用户并签发令牌
    pub async fn user(&self, name: &str) -> (UserProfile, String) {
        let profile = UserProfile::new(Uuid::new_v4(), name);
        self.store.add_user(profile.clone()).await;
        let token = self.jwt.generate_token(&profile, None).expect("token");
        (profile, token)
    }

    pub async fn open(&self) -> WsClient {
        let (stream, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("connect websocket");
        WsClient { stream }
    }

    pub async fn connect(&self, token: &str) -> WsClient {
        let mut client = self.open().await;
        client
            .send(serde_json::json!({ "type": "authenticate", "token": token }))
            .await;
        client.expect("auth_success").await;
        client
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn send(&mut self, value: Value) {
        self.stream
            .send(TungsteniteMessage::Text(value.to_string().into()))
            .await
            .expect("send frame");
    }

    /// 下一帧 JSON；关闭帧转成 `{"type":"close","code":..}`
    pub async fn next(&mut self) -> Option<Value> {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), self.stream.next())
                .await
                .ok()??
                .ok()?;
            match frame {
                TungsteniteMessage::Text(text) => {
                    return Some(serde_json::from_str(text.as_str()).expect("json frame"))
                }
                TungsteniteMessage::Close(frame) => {
                    let code = frame.map(|f| u16::from(f.code)).unwrap_or_default();
                    return Some(serde_json::json!({ "type": "close", "code": code }));
                }
                _ => continue,
            }
        }
    }

    pub async fn expect(&mut self, kind: &str) -> Value {
        loop {
            let frame = self
                .next()
                .await
                .unwrap_or_else(|| panic!("connection ended while waiting for {kind}"));
            if frame["type"] == kind {
                return frame;
            }
        }
    }
}
