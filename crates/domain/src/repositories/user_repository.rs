//! 用户资料查询

use crate::entities::user::UserProfile;
use crate::errors::DomainResult;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, user_id: Uuid) -> DomainResult<Option<UserProfile>>;

    /// 批量查询，缺失的ID被忽略
    async fn find_by_ids(&self, user_ids: &[Uuid]) -> DomainResult<Vec<UserProfile>>;
}
