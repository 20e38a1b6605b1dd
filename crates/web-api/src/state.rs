use std::sync::Arc;
use std::time::Duration;

use application::MessagingCore;
use config::AppConfig;

/// 连接层参数
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub core: MessagingCore,
    pub progression_token: Arc<str>,
    pub max_body_bytes: usize,
    pub connection: ConnectionSettings,
}

impl AppState {
    pub fn new(core: MessagingCore, progression_token: impl Into<Arc<str>>) -> Self {
        Self {
            core,
            progression_token: progression_token.into(),
            max_body_bytes: 1024 * 1024,
            connection: ConnectionSettings::default(),
        }
    }

    pub fn from_config(core: MessagingCore, config: &AppConfig) -> Self {
        Self {
            core,
            progression_token: config.progression.bearer_token.trim().into(),
            max_body_bytes: config.server.max_body_bytes,
            connection: ConnectionSettings {
                auth_timeout: Duration::from_secs(config.messaging.auth_timeout_seconds),
                heartbeat_interval: Duration::from_secs(
                    config.messaging.heartbeat_interval_seconds,
                ),
            },
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn with_connection_settings(mut self, connection: ConnectionSettings) -> Self {
        self.connection = connection;
        self
    }
}
