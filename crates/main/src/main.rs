//! 主应用程序入口
//!
//! 加载配置、连接存储、装配消息核心并启动 Axum 服务。

use std::{net::SocketAddr, sync::Arc};

use application::{MessagingCore, MessagingSettings};
use config::AppConfig;
use infrastructure::{Infrastructure, InfrastructureConfig};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load()?;
    tracing::info!(config = %config.sanitize(), "配置已加载");

    let infrastructure = Infrastructure::connect(InfrastructureConfig::from(&config)).await?;
    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

    let messaging = &config.messaging;
    let settings = MessagingSettings {
        session_ttl_seconds: config.redis.session_ttl_seconds,
        tail_capacity: messaging.conversation_tail_capacity,
        history_limit: messaging.history_limit,
        default_max_members: messaging.default_max_members,
        grace_period: chrono::Duration::days(messaging.group_grace_period_days),
        sweep_interval: std::time::Duration::from_secs(messaging.sweep_interval_seconds),
        index_capacity: messaging.message_index_capacity,
        max_cached_conversations: messaging.max_cached_conversations,
    };
    let core = MessagingCore::new(infrastructure.messaging_dependencies(jwt_service), settings);
    let sweeper = core.spawn_group_sweeper();

    let state = AppState::from_config(core, &config);
    let app = router(state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("消息核心服务启动在 http://{}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();
    tracing::info!("服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听关闭信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到关闭信号，开始优雅停机");
}
