//! Prometheus 指标（默认注册表）

use application::{ConnectionCounts, PoolStats};
use once_cell::sync::Lazy;
use prometheus::{
    opts, register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

pub static CONNECTIONS_OPENED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "messaging_connections_opened_total",
        "Total number of WebSocket connections accepted"
    ))
    .expect("register messaging_connections_opened_total")
});

pub static ACTIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "messaging_active_connections",
        "WebSocket connections currently open"
    ))
    .expect("register messaging_active_connections")
});

pub static AUTHENTICATED_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "messaging_authenticated_sessions",
        "Connections bound to an authenticated user"
    ))
    .expect("register messaging_authenticated_sessions")
});

pub static INBOUND_ENVELOPES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "messaging_inbound_envelopes_total",
            "Inbound WebSocket envelopes by type"
        ),
        &["type"]
    )
    .expect("register messaging_inbound_envelopes_total")
});

pub static PROGRESSION_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "messaging_progression_requests_total",
            "Progression sync requests by outcome"
        ),
        &["outcome"]
    )
    .expect("register messaging_progression_requests_total")
});

static POOL_SIZE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!("messaging_store_pool_size", "Open store connections"))
        .expect("register messaging_store_pool_size")
});

static POOL_IDLE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!("messaging_store_pool_idle", "Idle store connections"))
        .expect("register messaging_store_pool_idle")
});

/// 抓取前刷新瞬时值
pub fn refresh(counts: ConnectionCounts, pool: PoolStats) {
    ACTIVE_CONNECTIONS.set(counts.total as i64);
    AUTHENTICATED_SESSIONS.set(counts.authenticated as i64);
    POOL_SIZE.set(i64::from(pool.size));
    POOL_IDLE.set(i64::from(pool.idle));
}

pub fn gather() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
}
