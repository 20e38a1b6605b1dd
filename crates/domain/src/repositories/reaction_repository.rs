//! 消息回应Repository接口

use crate::entities::reaction::Reaction;
use crate::errors::DomainResult;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait ReactionRepository: Send + Sync {
    /// 三元组已存在时返回 false
    async fn add(&self, reaction: &Reaction) -> DomainResult<bool>;

    async fn remove(&self, message_id: Uuid, user_id: Uuid, reaction: &str) -> DomainResult<bool>;

    async fn list_for_message(&self, message_id: Uuid) -> DomainResult<Vec<Reaction>>;
}
