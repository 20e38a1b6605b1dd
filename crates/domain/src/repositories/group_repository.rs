//! 群组、群成员与群消息Repository接口

use crate::entities::group::{Group, GroupLifecycle, GroupMember, GroupRole};
use crate::entities::message::GroupMessage;
use crate::errors::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 群组Repository接口
#[async_trait]
pub trait GroupRepository: Send + Sync {
    /// 群组与初始成员在同一事务中写入
    async fn create_with_members(&self, group: &Group, members: &[GroupMember]) -> DomainResult<Group>;

    async fn find_by_id(&self, group_id: Uuid) -> DomainResult<Option<Group>>;

    /// 用户所在的活跃群组
    async fn list_active_for_user(&self, user_id: Uuid) -> DomainResult<Vec<Group>>;

    async fn update_lifecycle(&self, group_id: Uuid, lifecycle: &GroupLifecycle) -> DomainResult<()>;

    /// 软删除时间早于 `cutoff` 的群组
    async fn list_soft_deleted_before(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<Group>>;

    /// 硬删除：清除成员、消息、提及与回应，保留状态为 hard_deleted 的群组行
    async fn purge(&self, group_id: Uuid, at: DateTime<Utc>) -> DomainResult<()>;
}

/// 群成员Repository接口
#[async_trait]
pub trait GroupMemberRepository: Send + Sync {
    /// 已是成员时返回 ResourceAlreadyExists
    async fn add(&self, member: &GroupMember) -> DomainResult<GroupMember>;

    async fn remove(&self, group_id: Uuid, user_id: Uuid) -> DomainResult<bool>;

    async fn find(&self, group_id: Uuid, user_id: Uuid) -> DomainResult<Option<GroupMember>>;

    async fn list(&self, group_id: Uuid) -> DomainResult<Vec<GroupMember>>;

    async fn count(&self, group_id: Uuid) -> DomainResult<u32>;

    async fn update_role(&self, group_id: Uuid, user_id: Uuid, role: GroupRole) -> DomainResult<()>;
}

/// 群消息Repository接口
#[async_trait]
pub trait GroupMessageRepository: Send + Sync {
    /// 消息与提及一起写入
    async fn insert(&self, message: &GroupMessage) -> DomainResult<GroupMessage>;

    async fn find_by_id(&self, message_id: Uuid) -> DomainResult<Option<GroupMessage>>;

    async fn update_content(&self, message: &GroupMessage) -> DomainResult<()>;

    /// 对所有人删除，同时取消置顶
    async fn mark_deleted_for_everyone(&self, message_id: Uuid, at: DateTime<Utc>) -> DomainResult<()>;

    async fn hide_for_user(&self, message_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> DomainResult<()>;

    async fn recent(&self, group_id: Uuid, viewer_id: Uuid, limit: usize) -> DomainResult<Vec<GroupMessage>>;

    /// 先清除群内已有置顶再置顶目标消息，单个事务内完成
    async fn pin(
        &self,
        group_id: Uuid,
        message_id: Uuid,
        pinned_by: Uuid,
        at: DateTime<Utc>,
    ) -> DomainResult<()>;

    /// 返回被取消置顶的消息ID
    async fn unpin(&self, group_id: Uuid) -> DomainResult<Option<Uuid>>;

    async fn find_pinned(&self, group_id: Uuid) -> DomainResult<Option<GroupMessage>>;
}
