//! 存储健康探测接缝，供 `/ready` 与 `/health` 使用

use async_trait::async_trait;
use domain::DomainResult;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: u32,
    pub max: u32,
}

#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> DomainResult<()>;

    fn pool_stats(&self) -> PoolStats;
}
