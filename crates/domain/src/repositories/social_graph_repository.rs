//! 社交关系（屏蔽/关注）只读查询

use crate::errors::DomainResult;
use async_trait::async_trait;
use uuid::Uuid;

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait SocialGraphRepository: Send + Sync {
    /// 任一方向存在屏蔽关系即返回 true
    async fn is_blocked(&self, a: Uuid, b: Uuid) -> DomainResult<bool>;

    /// `follower` 是否关注了 `followee`（有向）
    async fn follows(&self, follower: Uuid, followee: Uuid) -> DomainResult<bool>;

    /// 与 `user_id` 存在任一方向屏蔽关系的用户
    async fn blocked_user_ids(&self, user_id: Uuid) -> DomainResult<Vec<Uuid>>;
}
