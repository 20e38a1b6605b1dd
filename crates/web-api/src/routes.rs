use std::net::SocketAddr;

use application::{ProgressionSyncRequest, ProgressionSyncResponse};
use axum::{
    extract::{
        rejection::JsonRejection, ws::WebSocketUpgrade, ConnectInfo, DefaultBodyLimit, State,
    },
    http::{header, Extensions, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    auth::{bearer_token, client_origin},
    error::ApiError,
    metrics,
    state::AppState,
    ws_connection::WebSocketConnection,
};

pub fn router(state: AppState) -> Router {
    let body_limit = state.max_body_bytes;
    Router::new()
        .route("/ws", get(websocket_upgrade))
        .route(
            "/community/progression",
            post(progression_sync).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/ready", get(ready))
        .route("/live", get(live))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
    ws: WebSocketUpgrade,
) -> Response {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let origin = client_origin(&headers, peer);
    ws.on_upgrade(move |socket| async move {
        let connection =
            WebSocketConnection::register(state.core.clone(), state.connection.clone(), origin);
        connection.run(socket).await;
    })
}

async fn progression_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ProgressionSyncRequest>, JsonRejection>,
) -> Result<Json<ProgressionSyncResponse>, ApiError> {
    let result = handle_progression(&state, &headers, body).await;
    let status = result.as_ref().err().map(|err| err.status());
    let outcome = match &status {
        None => "ok",
        Some(status) => status.as_str(),
    };
    metrics::PROGRESSION_REQUESTS
        .with_label_values(&[outcome])
        .inc();
    result
}

async fn handle_progression(
    state: &AppState,
    headers: &HeaderMap,
    body: Result<Json<ProgressionSyncRequest>, JsonRejection>,
) -> Result<Json<ProgressionSyncResponse>, ApiError> {
    match bearer_token(headers) {
        Some(token) if token == &*state.progression_token => {}
        Some(_) => return Err(ApiError::unauthorized("Invalid progression token")),
        None => return Err(ApiError::unauthorized("Missing authorization header")),
    }

    let Json(request) = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::payload_too_large(state.max_body_bytes)
        } else {
            ApiError::bad_request(rejection.body_text())
        }
    })?;

    let response = state.core.progression.sync(request).await?;
    tracing::info!(
        community_id = %response.community.community_id,
        event_recorded = response.event_recorded,
        delivered = response.broadcasts_delivered,
        "进度同步完成"
    );
    Ok(Json(response))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let counts = state.core.connections.counts();
    let pool = state.core.store_health.pool_stats();
    let store_ok = state.core.store_health.ping().await.is_ok();
    Json(json!({
        "status": if store_ok { "ok" } else { "degraded" },
        "connections": {
            "total": counts.total,
            "authenticated": counts.authenticated,
        },
        "pool": pool,
        "timestamp": state.core.clock.now(),
    }))
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    metrics::refresh(
        state.core.connections.counts(),
        state.core.store_health.pool_stats(),
    );
    match metrics::gather() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Failed to gather metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn ready(State(state): State<AppState>) -> StatusCode {
    match state.core.store_health.ping().await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            tracing::warn!(error = %err, "存储不可用");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn live() -> StatusCode {
    StatusCode::OK
}
