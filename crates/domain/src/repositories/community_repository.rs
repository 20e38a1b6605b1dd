//! 社区、成员、挑战事件与进度快照Repository接口

use crate::entities::community::{
    ChallengeEvent, Community, CommunityMember, ProgressSnapshot, RecordedEvent,
};
use crate::errors::DomainResult;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait CommunityRepository: Send + Sync {
    async fn upsert_community(&self, community: &Community) -> DomainResult<Community>;

    async fn find_community(&self, community_id: &str) -> DomainResult<Option<Community>>;

    /// 已是成员时返回现有记录
    async fn ensure_member(&self, member: &CommunityMember) -> DomainResult<CommunityMember>;

    async fn list_member_ids(&self, community_id: &str) -> DomainResult<Vec<Uuid>>;

    /// `eventId` 重复时不写入，返回首次写入的事件
    async fn record_event(&self, event: &ChallengeEvent) -> DomainResult<RecordedEvent>;

    async fn find_progress(
        &self,
        community_id: &str,
        user_id: Uuid,
    ) -> DomainResult<Option<ProgressSnapshot>>;

    /// 覆盖写入
    async fn upsert_progress(&self, snapshot: &ProgressSnapshot) -> DomainResult<ProgressSnapshot>;
}
