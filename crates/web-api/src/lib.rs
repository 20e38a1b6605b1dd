//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 消息入口、进度同步端点与运维探针，
//! 请求委托给应用层的消息核心。

mod auth;
mod error;
pub mod metrics;
mod routes;
mod state;
mod ws_connection;

pub use auth::{bearer_token, client_origin, Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, ConnectionSettings};
pub use ws_connection::WebSocketConnection;
