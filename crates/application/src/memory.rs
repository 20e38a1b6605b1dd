//! 内存存储适配器
//!
//! 实现全部Repository接口，供单机运行与测试使用。可以模拟存储不可用，
//! 用来验证授权闸门放行与历史回退等降级路径；也可以给写操作加延迟，
//! 模拟写入进行中时连接被关闭。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChallengeEvent, Community, CommunityMember, CommunityRepository, Conversation, ConversationId,
    ConversationRepository, DomainError, DomainResult, Group, GroupLifecycle, GroupMember,
    GroupMemberRepository, GroupMessage, GroupMessageRepository, GroupRepository, GroupRole,
    PrivateMessage, PrivateMessageRepository, ProgressSnapshot, Reaction, ReactionRepository,
    RecordedEvent, SocialGraphRepository, UserProfile, UserRepository,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::health::{PoolStats, StoreHealth};
use crate::session::{AuthFailure, AuthenticationOracle};

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<Uuid, UserProfile>,
    blocks: HashSet<(Uuid, Uuid)>,
    follows: HashSet<(Uuid, Uuid)>,

    conversations: HashMap<ConversationId, Conversation>,
    conversation_deletions: HashMap<(ConversationId, Uuid), DateTime<Utc>>,
    private_messages: HashMap<Uuid, PrivateMessage>,
    hidden: HashSet<(Uuid, Uuid)>,
    reactions: Vec<Reaction>,

    groups: HashMap<Uuid, Group>,
    members: HashMap<Uuid, Vec<GroupMember>>,
    group_messages: HashMap<Uuid, GroupMessage>,

    communities: HashMap<String, Community>,
    community_members: HashMap<String, Vec<CommunityMember>>,
    events: HashMap<String, ChallengeEvent>,
    progress: HashMap<(String, Uuid), ProgressSnapshot>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    unavailable: AtomicBool,
    write_delay_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user: UserProfile) {
        self.state.write().await.users.insert(user.user_id, user);
    }

    /// `blocker` 屏蔽 `blocked`
    pub async fn block(&self, blocker: Uuid, blocked: Uuid) {
        self.state.write().await.blocks.insert((blocker, blocked));
    }

    pub async fn follow(&self, follower: Uuid, followee: Uuid) {
        self.state
            .write()
            .await
            .follows
            .insert((follower, followee));
    }

    pub async fn follow_each_other(&self, a: Uuid, b: Uuid) {
        let mut state = self.state.write().await;
        state.follows.insert((a, b));
        state.follows.insert((b, a));
    }

    /// 模拟存储故障：之后的所有操作返回数据库错误
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 消息写入与群组生命周期写入前的人为延迟
    pub fn set_write_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.write_delay_ms.store(millis, Ordering::SeqCst);
    }

    async fn delay_write(&self) {
        let millis = self.write_delay_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    fn check(&self) -> DomainResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DomainError::database_error("memory store unavailable"));
        }
        Ok(())
    }
}

fn last_n<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    let skip = items.len().saturating_sub(limit);
    items.drain(..skip);
    items
}

#[async_trait]
impl SocialGraphRepository for MemoryStore {
    async fn is_blocked(&self, a: Uuid, b: Uuid) -> DomainResult<bool> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.blocks.contains(&(a, b)) || state.blocks.contains(&(b, a)))
    }

    async fn follows(&self, follower: Uuid, followee: Uuid) -> DomainResult<bool> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .follows
            .contains(&(follower, followee)))
    }

    async fn blocked_user_ids(&self, user_id: Uuid) -> DomainResult<Vec<Uuid>> {
        self.check()?;
        let state = self.state.read().await;
        let ids: HashSet<Uuid> = state
            .blocks
            .iter()
            .filter_map(|(a, b)| match (*a == user_id, *b == user_id) {
                (true, _) => Some(*b),
                (_, true) => Some(*a),
                _ => None,
            })
            .collect();
        Ok(ids.into_iter().collect())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_id(&self, user_id: Uuid) -> DomainResult<Option<UserProfile>> {
        self.check()?;
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn find_by_ids(&self, user_ids: &[Uuid]) -> DomainResult<Vec<UserProfile>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| state.users.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn upsert(&self, conversation: &Conversation) -> DomainResult<Conversation> {
        self.check()?;
        let mut state = self.state.write().await;
        let stored = state
            .conversations
            .entry(conversation.id.clone())
            .or_insert_with(|| conversation.clone());
        stored.deleted_at = None;
        Ok(stored.clone())
    }

    async fn find_by_id(&self, id: &ConversationId) -> DomainResult<Option<Conversation>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .conversations
            .get(id)
            .filter(|c| !c.is_deleted())
            .cloned())
    }

    async fn touch(&self, id: &ConversationId, at: DateTime<Utc>) -> DomainResult<()> {
        self.check()?;
        if let Some(conversation) = self.state.write().await.conversations.get_mut(id) {
            conversation.last_message_at = Some(at);
        }
        Ok(())
    }

    async fn delete_for_everyone(&self, id: &ConversationId, at: DateTime<Utc>) -> DomainResult<u64> {
        self.check()?;
        let mut state = self.state.write().await;
        if let Some(conversation) = state.conversations.get_mut(id) {
            conversation.deleted_at = Some(at);
        }
        let mut removed = 0;
        for message in state
            .private_messages
            .values_mut()
            .filter(|m| m.conversation_id == *id && !m.deleted_for_everyone)
        {
            message.content.clear();
            message.encrypted = None;
            message.deleted = true;
            message.deleted_at = Some(at);
            message.deleted_for_everyone = true;
            removed += 1;
        }
        Ok(removed)
    }

    async fn record_user_deletion(
        &self,
        id: &ConversationId,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.check()?;
        self.state
            .write()
            .await
            .conversation_deletions
            .insert((id.clone(), user_id), at);
        Ok(())
    }

    async fn find_user_deletion(
        &self,
        id: &ConversationId,
        user_id: Uuid,
    ) -> DomainResult<Option<DateTime<Utc>>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .conversation_deletions
            .get(&(id.clone(), user_id))
            .copied())
    }
}

#[async_trait]
impl PrivateMessageRepository for MemoryStore {
    async fn insert(&self, message: &PrivateMessage) -> DomainResult<PrivateMessage> {
        self.check()?;
        self.delay_write().await;
        self.state
            .write()
            .await
            .private_messages
            .insert(message.id, message.clone());
        Ok(message.clone())
    }

    async fn find_by_id(&self, message_id: Uuid) -> DomainResult<Option<PrivateMessage>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .private_messages
            .get(&message_id)
            .cloned())
    }

    async fn update_content(&self, message: &PrivateMessage) -> DomainResult<()> {
        self.check()?;
        let mut state = self.state.write().await;
        let stored = state
            .private_messages
            .get_mut(&message.id)
            .ok_or_else(|| DomainError::resource_not_found("message", message.id.to_string()))?;
        stored.content = message.content.clone();
        stored.encrypted = message.encrypted.clone();
        stored.edited = message.edited;
        stored.edited_at = message.edited_at;
        Ok(())
    }

    async fn mark_deleted_for_everyone(&self, message_id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        self.check()?;
        let mut state = self.state.write().await;
        let stored = state
            .private_messages
            .get_mut(&message_id)
            .ok_or_else(|| DomainError::resource_not_found("message", message_id.to_string()))?;
        stored.content.clear();
        stored.encrypted = None;
        stored.deleted = true;
        stored.deleted_at = Some(at);
        stored.deleted_for_everyone = true;
        Ok(())
    }

    async fn hide_for_user(&self, message_id: Uuid, user_id: Uuid, _at: DateTime<Utc>) -> DomainResult<()> {
        self.check()?;
        self.state.write().await.hidden.insert((message_id, user_id));
        Ok(())
    }

    async fn recent(
        &self,
        conversation_id: &ConversationId,
        viewer_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> DomainResult<Vec<PrivateMessage>> {
        self.check()?;
        let state = self.state.read().await;
        let mut messages: Vec<_> = state
            .private_messages
            .values()
            .filter(|m| m.conversation_id == *conversation_id && !m.deleted_for_everyone)
            .filter(|m| !state.hidden.contains(&(m.id, viewer_id)))
            .filter(|m| since.map_or(true, |at| m.timestamp > at))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        Ok(last_n(messages, limit))
    }

    async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        reader_id: Uuid,
        message_ids: Option<Vec<Uuid>>,
    ) -> DomainResult<Vec<Uuid>> {
        self.check()?;
        let wanted: Option<HashSet<Uuid>> = message_ids.map(|ids| ids.into_iter().collect());
        let mut state = self.state.write().await;
        let mut updated: Vec<_> = state
            .private_messages
            .values_mut()
            .filter(|m| m.conversation_id == *conversation_id && m.recipient_id == reader_id)
            .filter(|m| !m.is_read && !m.deleted_for_everyone)
            .filter(|m| wanted.as_ref().map_or(true, |ids| ids.contains(&m.id)))
            .map(|m| {
                m.is_read = true;
                (m.timestamp, m.id)
            })
            .collect();
        updated.sort();
        Ok(updated.into_iter().map(|(_, id)| id).collect())
    }
}

#[async_trait]
impl ReactionRepository for MemoryStore {
    async fn add(&self, reaction: &Reaction) -> DomainResult<bool> {
        self.check()?;
        let mut state = self.state.write().await;
        let exists = state.reactions.iter().any(|r| {
            r.message_id == reaction.message_id
                && r.user_id == reaction.user_id
                && r.reaction == reaction.reaction
        });
        if exists {
            return Ok(false);
        }
        state.reactions.push(reaction.clone());
        Ok(true)
    }

    async fn remove(&self, message_id: Uuid, user_id: Uuid, reaction: &str) -> DomainResult<bool> {
        self.check()?;
        let mut state = self.state.write().await;
        let before = state.reactions.len();
        state.reactions.retain(|r| {
            !(r.message_id == message_id && r.user_id == user_id && r.reaction == reaction)
        });
        Ok(state.reactions.len() != before)
    }

    async fn list_for_message(&self, message_id: Uuid) -> DomainResult<Vec<Reaction>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .reactions
            .iter()
            .filter(|r| r.message_id == message_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GroupRepository for MemoryStore {
    async fn create_with_members(&self, group: &Group, members: &[GroupMember]) -> DomainResult<Group> {
        self.check()?;
        let mut state = self.state.write().await;
        state.groups.insert(group.group_id, group.clone());
        state.members.insert(group.group_id, members.to_vec());
        Ok(group.clone())
    }

    async fn find_by_id(&self, group_id: Uuid) -> DomainResult<Option<Group>> {
        self.check()?;
        Ok(self.state.read().await.groups.get(&group_id).cloned())
    }

    async fn list_active_for_user(&self, user_id: Uuid) -> DomainResult<Vec<Group>> {
        self.check()?;
        let state = self.state.read().await;
        let mut groups: Vec<_> = state
            .members
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m.user_id == user_id))
            .filter_map(|(group_id, _)| state.groups.get(group_id))
            .filter(|g| g.is_active())
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.created_at);
        Ok(groups)
    }

    async fn update_lifecycle(&self, group_id: Uuid, lifecycle: &GroupLifecycle) -> DomainResult<()> {
        self.check()?;
        self.delay_write().await;
        let mut state = self.state.write().await;
        let group = state
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| DomainError::resource_not_found("group", group_id.to_string()))?;
        group.lifecycle = *lifecycle;
        if let Some(at) = lifecycle.deleted_at() {
            group.updated_at = at;
        }
        Ok(())
    }

    async fn list_soft_deleted_before(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<Group>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .groups
            .values()
            .filter(|g| {
                matches!(g.lifecycle, GroupLifecycle::SoftDeleted { deleted_at } if deleted_at <= cutoff)
            })
            .cloned()
            .collect())
    }

    async fn purge(&self, group_id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        self.check()?;
        self.delay_write().await;
        let mut state = self.state.write().await;
        state.members.remove(&group_id);
        let purged: HashSet<Uuid> = state
            .group_messages
            .values()
            .filter(|m| m.group_id == group_id)
            .map(|m| m.id)
            .collect();
        state.group_messages.retain(|id, _| !purged.contains(id));
        state.reactions.retain(|r| !purged.contains(&r.message_id));
        state.hidden.retain(|(message_id, _)| !purged.contains(message_id));
        if let Some(group) = state.groups.get_mut(&group_id) {
            group.lifecycle = GroupLifecycle::HardDeleted { deleted_at: at };
            group.updated_at = at;
        }
        Ok(())
    }
}

#[async_trait]
impl GroupMemberRepository for MemoryStore {
    async fn add(&self, member: &GroupMember) -> DomainResult<GroupMember> {
        self.check()?;
        let mut state = self.state.write().await;
        let members = state.members.entry(member.group_id).or_default();
        if members.iter().any(|m| m.user_id == member.user_id) {
            return Err(DomainError::resource_already_exists(
                "group_member",
                member.user_id.to_string(),
            ));
        }
        members.push(member.clone());
        Ok(member.clone())
    }

    async fn remove(&self, group_id: Uuid, user_id: Uuid) -> DomainResult<bool> {
        self.check()?;
        let mut state = self.state.write().await;
        let Some(members) = state.members.get_mut(&group_id) else {
            return Ok(false);
        };
        let before = members.len();
        members.retain(|m| m.user_id != user_id);
        Ok(members.len() != before)
    }

    async fn find(&self, group_id: Uuid, user_id: Uuid) -> DomainResult<Option<GroupMember>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .members
            .get(&group_id)
            .and_then(|members| members.iter().find(|m| m.user_id == user_id).cloned()))
    }

    async fn list(&self, group_id: Uuid) -> DomainResult<Vec<GroupMember>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .members
            .get(&group_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn count(&self, group_id: Uuid) -> DomainResult<u32> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .members
            .get(&group_id)
            .map(|members| members.len() as u32)
            .unwrap_or(0))
    }

    async fn update_role(&self, group_id: Uuid, user_id: Uuid, role: GroupRole) -> DomainResult<()> {
        self.check()?;
        let mut state = self.state.write().await;
        let member = state
            .members
            .get_mut(&group_id)
            .and_then(|members| members.iter_mut().find(|m| m.user_id == user_id))
            .ok_or_else(|| DomainError::resource_not_found("group_member", user_id.to_string()))?;
        match role {
            GroupRole::Admin => member.promote(),
            GroupRole::Member => member.demote(),
        }
        Ok(())
    }
}

fn clear_pin(message: &mut GroupMessage) {
    message.is_pinned = false;
    message.pinned_at = None;
    message.pinned_by_user_id = None;
}

#[async_trait]
impl GroupMessageRepository for MemoryStore {
    async fn insert(&self, message: &GroupMessage) -> DomainResult<GroupMessage> {
        self.check()?;
        self.delay_write().await;
        self.state
            .write()
            .await
            .group_messages
            .insert(message.id, message.clone());
        Ok(message.clone())
    }

    async fn find_by_id(&self, message_id: Uuid) -> DomainResult<Option<GroupMessage>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .group_messages
            .get(&message_id)
            .cloned())
    }

    async fn update_content(&self, message: &GroupMessage) -> DomainResult<()> {
        self.check()?;
        let mut state = self.state.write().await;
        let stored = state
            .group_messages
            .get_mut(&message.id)
            .ok_or_else(|| DomainError::resource_not_found("message", message.id.to_string()))?;
        stored.content = message.content.clone();
        stored.encrypted = message.encrypted.clone();
        stored.edited = message.edited;
        stored.edited_at = message.edited_at;
        Ok(())
    }

    async fn mark_deleted_for_everyone(&self, message_id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        self.check()?;
        let mut state = self.state.write().await;
        let stored = state
            .group_messages
            .get_mut(&message_id)
            .ok_or_else(|| DomainError::resource_not_found("message", message_id.to_string()))?;
        stored.content.clear();
        stored.encrypted = None;
        stored.deleted = true;
        stored.deleted_at = Some(at);
        stored.deleted_for_everyone = true;
        clear_pin(stored);
        Ok(())
    }

    async fn hide_for_user(&self, message_id: Uuid, user_id: Uuid, _at: DateTime<Utc>) -> DomainResult<()> {
        self.check()?;
        self.state.write().await.hidden.insert((message_id, user_id));
        Ok(())
    }

    async fn recent(&self, group_id: Uuid, viewer_id: Uuid, limit: usize) -> DomainResult<Vec<GroupMessage>> {
        self.check()?;
        let state = self.state.read().await;
        let mut messages: Vec<_> = state
            .group_messages
            .values()
            .filter(|m| m.group_id == group_id && !m.deleted_for_everyone)
            .filter(|m| !state.hidden.contains(&(m.id, viewer_id)))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        Ok(last_n(messages, limit))
    }

    async fn pin(
        &self,
        group_id: Uuid,
        message_id: Uuid,
        pinned_by: Uuid,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.check()?;
        let mut state = self.state.write().await;
        let target_in_group = state
            .group_messages
            .get(&message_id)
            .is_some_and(|m| m.group_id == group_id);
        if !target_in_group {
            return Err(DomainError::resource_not_found("message", message_id.to_string()));
        }
        for message in state
            .group_messages
            .values_mut()
            .filter(|m| m.group_id == group_id && m.is_pinned)
        {
            clear_pin(message);
        }
        if let Some(message) = state.group_messages.get_mut(&message_id) {
            message.is_pinned = true;
            message.pinned_at = Some(at);
            message.pinned_by_user_id = Some(pinned_by);
        }
        Ok(())
    }

    async fn unpin(&self, group_id: Uuid) -> DomainResult<Option<Uuid>> {
        self.check()?;
        let mut state = self.state.write().await;
        let pinned = state
            .group_messages
            .values_mut()
            .find(|m| m.group_id == group_id && m.is_pinned);
        Ok(pinned.map(|message| {
            clear_pin(message);
            message.id
        }))
    }

    async fn find_pinned(&self, group_id: Uuid) -> DomainResult<Option<GroupMessage>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .group_messages
            .values()
            .find(|m| m.group_id == group_id && m.is_pinned)
            .cloned())
    }
}

#[async_trait]
impl CommunityRepository for MemoryStore {
    async fn upsert_community(&self, community: &Community) -> DomainResult<Community> {
        self.check()?;
        self.state
            .write()
            .await
            .communities
            .insert(community.community_id.clone(), community.clone());
        Ok(community.clone())
    }

    async fn find_community(&self, community_id: &str) -> DomainResult<Option<Community>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .communities
            .get(community_id)
            .cloned())
    }

    async fn ensure_member(&self, member: &CommunityMember) -> DomainResult<CommunityMember> {
        self.check()?;
        let mut state = self.state.write().await;
        let members = state
            .community_members
            .entry(member.community_id.clone())
            .or_default();
        if let Some(existing) = members.iter().find(|m| m.user_id == member.user_id) {
            return Ok(existing.clone());
        }
        members.push(member.clone());
        Ok(member.clone())
    }

    async fn list_member_ids(&self, community_id: &str) -> DomainResult<Vec<Uuid>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .community_members
            .get(community_id)
            .map(|members| members.iter().map(|m| m.user_id).collect())
            .unwrap_or_default())
    }

    async fn record_event(&self, event: &ChallengeEvent) -> DomainResult<RecordedEvent> {
        self.check()?;
        let mut state = self.state.write().await;
        if let Some(existing) = state.events.get(&event.event_id) {
            return Ok(RecordedEvent {
                event: existing.clone(),
                newly_recorded: false,
            });
        }
        state.events.insert(event.event_id.clone(), event.clone());
        Ok(RecordedEvent {
            event: event.clone(),
            newly_recorded: true,
        })
    }

    async fn find_progress(
        &self,
        community_id: &str,
        user_id: Uuid,
    ) -> DomainResult<Option<ProgressSnapshot>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .progress
            .get(&(community_id.to_string(), user_id))
            .cloned())
    }

    async fn upsert_progress(&self, snapshot: &ProgressSnapshot) -> DomainResult<ProgressSnapshot> {
        self.check()?;
        self.state.write().await.progress.insert(
            (snapshot.community_id.clone(), snapshot.user_id),
            snapshot.clone(),
        );
        Ok(snapshot.clone())
    }
}

#[async_trait]
impl StoreHealth for MemoryStore {
    async fn ping(&self) -> DomainResult<()> {
        self.check()
    }

    fn pool_stats(&self) -> PoolStats {
        PoolStats::default()
    }
}

/// 固定令牌表的认证服务，用于单机运行与测试
#[derive(Debug, Default)]
pub struct StaticTokenOracle {
    tokens: RwLock<HashMap<String, UserProfile>>,
}

impl StaticTokenOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn issue(&self, token: impl Into<String>, user: UserProfile) {
        self.tokens.write().await.insert(token.into(), user);
    }
}

#[async_trait]
impl AuthenticationOracle for StaticTokenOracle {
    async fn verify(&self, token: &str, _origin: Option<&str>) -> Result<UserProfile, AuthFailure> {
        self.tokens
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or_else(|| AuthFailure::InvalidToken("unknown token".to_string()))
    }
}
