use application::{
    ConnectionId, ErrorCode, MessagingCore, OutboundFrame, ServerEvent, CLOSE_AUTH_TIMEOUT,
};
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};

use crate::metrics;
use crate::state::ConnectionSettings;

/// WebSocket 连接
///
/// 每个连接两个任务：
/// - 写任务：消费出站队列，并按心跳间隔发送 ping
/// - 读任务：把文本帧交给消息路由；写任务先结束时只停止读取新帧，
///   正在处理的请求照常完成
///
/// 另有一个认证计时器，超时未认证的连接收到 `error` 后被关闭。
pub struct WebSocketConnection {
    core: MessagingCore,
    settings: ConnectionSettings,
    connection_id: ConnectionId,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl WebSocketConnection {
    pub fn register(core: MessagingCore, settings: ConnectionSettings, origin: Option<String>) -> Self {
        let (tx, outbound) = mpsc::unbounded_channel();
        let connection_id = core.connections.register(origin.clone(), tx, core.clock.now());
        metrics::CONNECTIONS_OPENED.inc();
        tracing::info!(connection_id = %connection_id, origin = ?origin, "WebSocket 连接已建立");

        Self {
            core,
            settings,
            connection_id,
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection_id
    }

    /// 运行连接主循环，直到任一方向结束
    pub async fn run(self, socket: WebSocket) {
        let Self {
            core,
            settings,
            connection_id,
            outbound,
        } = self;
        let (sender, mut incoming) = socket.split();

        let mut send_task = tokio::spawn(write_loop(sender, outbound, settings.heartbeat_interval));

        // 关闭信号只在两帧之间生效，进行中的 dispatch 总会执行完
        let (closing_tx, mut closing_rx) = watch::channel(false);
        let mut recv_task = {
            let core = core.clone();
            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = closing_rx.changed() => break,
                        next = incoming.next() => next,
                    };
                    let Some(Ok(message)) = next else { break };
                    core.connections.touch(connection_id, core.clock.now());
                    match message {
                        WsMessage::Text(text) => dispatch(&core, connection_id, text.as_str()).await,
                        WsMessage::Binary(bytes) => match std::str::from_utf8(&bytes) {
                            Ok(text) => dispatch(&core, connection_id, text).await,
                            Err(_) => {
                                core.fanout.send_to_connection(
                                    connection_id,
                                    &ServerEvent::error("Invalid message format", ErrorCode::InvalidMessage),
                                );
                            }
                        },
                        WsMessage::Close(_) => {
                            tracing::debug!(connection_id = %connection_id, "收到关闭消息");
                            break;
                        }
                        // 协议层 ping 由 tungstenite 自动回复 pong
                        WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                    }
                }
            })
        };

        let auth_guard = {
            let core = core.clone();
            let timeout = settings.auth_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let unauthenticated = core
                    .connections
                    .info(connection_id)
                    .is_some_and(|info| info.user.is_none());
                if unauthenticated {
                    tracing::info!(connection_id = %connection_id, "认证超时，关闭连接");
                    core.fanout.send_to_connection(
                        connection_id,
                        &ServerEvent::error("Authentication timeout", ErrorCode::NotAuthenticated),
                    );
                    core.connections
                        .close(connection_id, CLOSE_AUTH_TIMEOUT, "authentication_timeout");
                }
            })
        };

        tokio::select! {
            _ = &mut send_task => {
                tracing::debug!(connection_id = %connection_id, "WebSocket发送任务结束");
                // 不中断接收任务：等当前请求的存储写入完成
                let _ = closing_tx.send(true);
                if let Err(err) = recv_task.await {
                    tracing::warn!(connection_id = %connection_id, error = %err, "WebSocket接收任务异常退出");
                }
            }
            _ = &mut recv_task => {
                tracing::debug!(connection_id = %connection_id, "WebSocket接收任务结束");
                send_task.abort();
            }
        }
        auth_guard.abort();

        core.router.disconnect(connection_id).await;
        tracing::info!(connection_id = %connection_id, "WebSocket连接已断开");
    }
}

async fn dispatch(core: &MessagingCore, connection_id: ConnectionId, text: &str) {
    if let Some(kind) = core.router.dispatch(connection_id, text).await {
        metrics::INBOUND_ENVELOPES.with_label_values(&[kind]).inc();
    }
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    heartbeat: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await;
    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(OutboundFrame::Text(text)) => {
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        tracing::warn!("Failed to send text message");
                        break;
                    }
                }
                Some(OutboundFrame::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    if let Err(err) = sender.send(WsMessage::Close(Some(frame))).await {
                        tracing::debug!(error = %err, "关闭帧发送失败");
                    }
                    break;
                }
                None => break,
            },
            _ = ticker.tick() => {
                if sender.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    tracing::debug!("心跳发送失败");
                    break;
                }
            }
        }
    }
}
