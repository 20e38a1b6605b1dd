//! 私聊会话与私聊消息Repository接口

use crate::entities::conversation::{Conversation, ConversationId};
use crate::entities::message::PrivateMessage;
use crate::errors::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 会话Repository接口
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// 不存在则创建；已对所有人删除的会话被重新激活
    async fn upsert(&self, conversation: &Conversation) -> DomainResult<Conversation>;

    async fn find_by_id(&self, id: &ConversationId) -> DomainResult<Option<Conversation>>;

    /// 更新最后消息时间
    async fn touch(&self, id: &ConversationId, at: DateTime<Utc>) -> DomainResult<()>;

    /// 对所有人删除：会话及其全部消息标记删除
    async fn delete_for_everyone(&self, id: &ConversationId, at: DateTime<Utc>) -> DomainResult<u64>;

    /// 记录单方删除标记
    async fn record_user_deletion(
        &self,
        id: &ConversationId,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> DomainResult<()>;

    async fn find_user_deletion(
        &self,
        id: &ConversationId,
        user_id: Uuid,
    ) -> DomainResult<Option<DateTime<Utc>>>;
}

/// 私聊消息Repository接口
#[async_trait]
pub trait PrivateMessageRepository: Send + Sync {
    async fn insert(&self, message: &PrivateMessage) -> DomainResult<PrivateMessage>;

    async fn find_by_id(&self, message_id: Uuid) -> DomainResult<Option<PrivateMessage>>;

    /// 持久化编辑后的内容
    async fn update_content(&self, message: &PrivateMessage) -> DomainResult<()>;

    async fn mark_deleted_for_everyone(&self, message_id: Uuid, at: DateTime<Utc>) -> DomainResult<()>;

    /// "仅对我删除"：写入独立的删除标记，不修改共享行
    async fn hide_for_user(&self, message_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> DomainResult<()>;

    /// 最近消息（按时间升序），排除 viewer 隐藏的消息与 `since` 之前的消息
    async fn recent(
        &self,
        conversation_id: &ConversationId,
        viewer_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> DomainResult<Vec<PrivateMessage>>;

    /// 把发给 `reader_id` 的未读消息标记为已读，返回实际更新的消息ID
    async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        reader_id: Uuid,
        message_ids: Option<Vec<Uuid>>,
    ) -> DomainResult<Vec<Uuid>>;
}
