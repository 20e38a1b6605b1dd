//! 群聊引擎
//!
//! 成员角色、@提及、回应、单槽置顶/公告，以及群组生命周期
//! （active → soft_deleted → hard_deleted）。同一群组的成员变更、置顶与删除串行执行。

use std::collections::HashSet;
use std::sync::Arc;

use domain::{
    normalize_reaction, parse_mentions, resolve_mentions, Group, GroupMember,
    GroupMemberRepository, GroupMessage, GroupMessageRepository, GroupRepository, GroupRole,
    Reaction, ReactionRepository, ResolvedMentions, UserProfile, UserRepository,
};
use uuid::Uuid;

use crate::{
    authorization::AuthorizationGate,
    broadcaster::BroadcastFanout,
    cipher::{reveal, seal, MessageCipher},
    clock::Clock,
    error::{ApplicationError, ErrorCode},
    index::{MessageIndex, MessageLocation},
    locks::{KeyedGuard, KeyedLocks},
    protocol::ServerEvent,
    services::Caller,
};

#[derive(Debug, Clone)]
pub struct CreateGroupRequest {
    pub name: String,
    pub description: Option<String>,
    pub initial_members: Vec<Uuid>,
    pub max_members: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SendGroupMessageRequest {
    pub group_id: Uuid,
    pub content: String,
    pub reply_to: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct EditGroupMessageRequest {
    pub message_id: Uuid,
    pub content: String,
    pub group_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct DeleteGroupMessageRequest {
    pub message_id: Uuid,
    pub for_everyone: bool,
    pub group_id: Option<Uuid>,
}

pub struct GroupServiceDependencies {
    pub gate: AuthorizationGate,
    pub group_repository: Arc<dyn GroupRepository>,
    pub member_repository: Arc<dyn GroupMemberRepository>,
    pub message_repository: Arc<dyn GroupMessageRepository>,
    pub reaction_repository: Arc<dyn ReactionRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub cipher: Arc<dyn MessageCipher>,
    pub clock: Arc<dyn Clock>,
    pub fanout: BroadcastFanout,
    pub index: Arc<MessageIndex>,
    pub history_limit: usize,
    pub default_max_members: u32,
    pub grace_period: chrono::Duration,
}

pub struct GroupService {
    deps: GroupServiceDependencies,
    locks: KeyedLocks<Uuid>,
}

impl GroupService {
    pub fn new(deps: GroupServiceDependencies) -> Self {
        Self {
            deps,
            locks: KeyedLocks::new(),
        }
    }

    /// 当前持有或等待中的群组锁数
    pub fn pending_locks(&self) -> usize {
        self.locks.len()
    }

    /// 先取群组锁再检查生命周期，持锁期间群组不会被并发删除
    async fn lock_active_group(
        &self,
        group_id: Uuid,
    ) -> Result<(KeyedGuard<'_, Uuid>, Group), ApplicationError> {
        let guard = self.locks.lock(group_id).await;
        let group = self.active_group(group_id).await?;
        Ok((guard, group))
    }

    async fn load_group(&self, group_id: Uuid) -> Result<Group, ApplicationError> {
        self.deps
            .group_repository
            .find_by_id(group_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("group", group_id))
    }

    /// 非 active 的群组拒绝一切操作
    async fn active_group(&self, group_id: Uuid) -> Result<Group, ApplicationError> {
        let group = self.load_group(group_id).await?;
        if !group.is_active() {
            return Err(ApplicationError::validation(
                ErrorCode::GroupNotActive,
                "This group is no longer active",
            ));
        }
        Ok(group)
    }

    async fn require_member(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<GroupMember, ApplicationError> {
        self.deps
            .member_repository
            .find(group_id, user_id)
            .await?
            .ok_or_else(|| {
                ApplicationError::authorization(
                    ErrorCode::NotGroupMember,
                    "You are not a member of this group",
                )
            })
    }

    async fn require_admin(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        action: &str,
    ) -> Result<GroupMember, ApplicationError> {
        let member = self.require_member(group_id, user_id).await?;
        if !member.is_admin() {
            return Err(ApplicationError::authorization(
                ErrorCode::InsufficientPermissions,
                format!("Only group admins can {}", action),
            ));
        }
        Ok(member)
    }

    async fn member_ids(&self, group_id: Uuid) -> Result<Vec<Uuid>, ApplicationError> {
        let members = self.deps.member_repository.list(group_id).await?;
        Ok(members.into_iter().map(|m| m.user_id).collect())
    }

    pub async fn create_group(
        &self,
        caller: &Caller,
        request: CreateGroupRequest,
    ) -> Result<Group, ApplicationError> {
        let creator_id = caller.user_id();
        let now = self.deps.clock.now();
        let max_members = request
            .max_members
            .unwrap_or(self.deps.default_max_members);
        let group = Group::new(request.name, request.description, creator_id, max_members, now)?;

        let mut seen = HashSet::new();
        let candidates: Vec<Uuid> = request
            .initial_members
            .into_iter()
            .filter(|id| *id != creator_id && seen.insert(*id))
            .collect();
        let screening = self.deps.gate.screen_candidates(creator_id, &candidates).await;

        // 容量检查在任何写入之前
        let requested = screening.allowed.len() as u32 + 1;
        if !group.has_capacity_for(requested) {
            return Err(ApplicationError::validation(
                ErrorCode::TooManyMembers,
                format!("A group can have at most {} members", max_members),
            )
            .with_details(serde_json::json!({
                "maxMembers": max_members,
                "requested": requested,
            })));
        }

        let mut members = vec![GroupMember::new(group.group_id, creator_id, GroupRole::Admin, now)];
        members.extend(
            screening
                .allowed
                .iter()
                .map(|id| GroupMember::new(group.group_id, *id, GroupRole::Member, now)),
        );
        let group = self
            .deps
            .group_repository
            .create_with_members(&group, &members)
            .await?;

        self.deps.fanout.send_to_connection(
            caller.connection_id,
            &ServerEvent::GroupCreated {
                group: group.clone(),
                members,
                excluded_members: screening.excluded.iter().map(|(id, _)| *id).collect(),
            },
        );
        self.deps.fanout.send_to_users(
            screening.allowed.iter().copied(),
            &ServerEvent::AddedToGroup {
                group: group.clone(),
                added_by: creator_id,
            },
            Some(creator_id),
        );
        tracing::info!(
            group_id = %group.group_id,
            creator = %creator_id,
            members = requested,
            excluded = screening.excluded.len(),
            "群组已创建"
        );
        Ok(group)
    }

    pub async fn list_groups(&self, caller: &Caller) -> Result<Vec<Group>, ApplicationError> {
        let groups = self
            .deps
            .group_repository
            .list_active_for_user(caller.user_id())
            .await?;
        self.deps.fanout.send_to_connection(
            caller.connection_id,
            &ServerEvent::GroupList {
                groups: groups.clone(),
            },
        );
        Ok(groups)
    }

    pub async fn get_history(
        &self,
        caller: &Caller,
        group_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<GroupMessage>, ApplicationError> {
        self.active_group(group_id).await?;
        self.require_member(group_id, caller.user_id()).await?;

        let limit = limit
            .unwrap_or(self.deps.history_limit)
            .clamp(1, self.deps.history_limit);
        let messages: Vec<_> = self
            .deps
            .message_repository
            .recent(group_id, caller.user_id(), limit)
            .await?
            .into_iter()
            .map(|m| self.revealed(m))
            .collect();
        let pinned_message = self
            .deps
            .message_repository
            .find_pinned(group_id)
            .await?
            .map(|m| self.revealed(m));

        self.deps.fanout.send_to_connection(
            caller.connection_id,
            &ServerEvent::GroupHistory {
                group_id,
                messages: messages.clone(),
                pinned_message,
            },
        );
        Ok(messages)
    }

    fn revealed(&self, message: GroupMessage) -> GroupMessage {
        self.deps
            .index
            .record(message.id, MessageLocation::Group(message.group_id));
        reveal(self.deps.cipher.as_ref(), message)
    }

    /// 解析提及；用户资料查询失败时只保留 @everyone
    async fn mentions_for(
        &self,
        content: &str,
        sender_id: Uuid,
        member_ids: &[Uuid],
    ) -> ResolvedMentions {
        let tokens = parse_mentions(content);
        if tokens.is_empty() {
            return ResolvedMentions::default();
        }
        let profiles = match self.deps.user_repository.find_by_ids(member_ids).await {
            Ok(profiles) => profiles,
            Err(err) => {
                tracing::warn!(error = %err, "提及解析时查询用户资料失败");
                member_ids
                    .iter()
                    .map(|id| UserProfile::new(*id, String::new()))
                    .collect()
            }
        };
        resolve_mentions(&tokens, sender_id, &profiles)
    }

    async fn store_new(&self, message: &GroupMessage) -> Result<GroupMessage, ApplicationError> {
        let sealed = seal(self.deps.cipher.as_ref(), message)?;
        let stored = self.deps.message_repository.insert(&sealed).await?;
        Ok(self.revealed(stored))
    }

    /// 广播新消息：发送者收到确认，其他成员收到新消息，被提及者额外收到 mentioned
    fn deliver_new(
        &self,
        caller: &Caller,
        message: &GroupMessage,
        member_ids: &[Uuid],
        notify: &[Uuid],
    ) {
        self.deps.fanout.send_to_connection(
            caller.connection_id,
            &ServerEvent::GroupMessageSent {
                message: message.clone(),
            },
        );
        let delivered = self.deps.fanout.send_to_users(
            member_ids.iter().copied(),
            &ServerEvent::NewGroupMessage {
                message: message.clone(),
            },
            Some(caller.user_id()),
        );
        if !notify.is_empty() {
            self.deps.fanout.send_to_users(
                notify.iter().copied(),
                &ServerEvent::Mentioned {
                    group_id: message.group_id,
                    message: message.clone(),
                },
                Some(caller.user_id()),
            );
        }
        tracing::debug!(message_id = %message.id, group_id = %message.group_id, delivered, mentioned = notify.len(), "群消息已发送");
    }

    pub async fn send_group_message(
        &self,
        caller: &Caller,
        request: SendGroupMessageRequest,
    ) -> Result<GroupMessage, ApplicationError> {
        let sender_id = caller.user_id();
        let group_id = request.group_id;
        self.active_group(group_id).await?;
        let member = self.require_member(group_id, sender_id).await?;
        if !member.can_send_messages {
            return Err(ApplicationError::authorization(
                ErrorCode::InsufficientPermissions,
                "You are not allowed to send messages in this group",
            ));
        }
        domain::validate_content(&request.content)?;

        if let Some(reply_to) = request.reply_to {
            let target = self.find_message(reply_to).await?;
            if target.map(|m| m.group_id) != Some(group_id) {
                return Err(ApplicationError::not_found("message", reply_to));
            }
        }

        let member_ids = self.member_ids(group_id).await?;
        let resolved = self
            .mentions_for(&request.content, sender_id, &member_ids)
            .await;
        let message = GroupMessage::new(
            group_id,
            sender_id,
            request.content,
            request.reply_to,
            resolved.mentions.clone(),
            self.deps.clock.now(),
        )?;
        let message = self.store_new(&message).await?;

        self.deliver_new(caller, &message, &member_ids, &resolved.notify);
        Ok(message)
    }

    /// 按主键加载并回填索引
    pub async fn find_message(
        &self,
        message_id: Uuid,
    ) -> Result<Option<GroupMessage>, ApplicationError> {
        let message = self.deps.message_repository.find_by_id(message_id).await?;
        Ok(message.map(|m| self.revealed(m)))
    }

    async fn load_message(
        &self,
        message_id: Uuid,
        group_hint: Option<Uuid>,
    ) -> Result<GroupMessage, ApplicationError> {
        self.find_message(message_id)
            .await?
            .filter(|m| group_hint.map_or(true, |hint| hint == m.group_id))
            .ok_or_else(|| ApplicationError::not_found("message", message_id))
    }

    pub async fn edit_group_message(
        &self,
        caller: &Caller,
        request: EditGroupMessageRequest,
    ) -> Result<GroupMessage, ApplicationError> {
        let mut message = self.load_message(request.message_id, request.group_id).await?;
        self.active_group(message.group_id).await?;
        self.require_member(message.group_id, caller.user_id()).await?;

        message.edit(caller.user_id(), request.content, self.deps.clock.now())?;
        let sealed = seal(self.deps.cipher.as_ref(), &message)?;
        self.deps.message_repository.update_content(&sealed).await?;

        let member_ids = self.member_ids(message.group_id).await?;
        self.deps.fanout.send_to_users(
            member_ids,
            &ServerEvent::GroupMessageEdited {
                message: message.clone(),
            },
            None,
        );
        Ok(message)
    }

    /// 对所有人删除：发送者或管理员；否则只对调用方隐藏
    pub async fn delete_group_message(
        &self,
        caller: &Caller,
        request: DeleteGroupMessageRequest,
    ) -> Result<(), ApplicationError> {
        let actor_id = caller.user_id();
        let message = self.load_message(request.message_id, request.group_id).await?;
        let group_id = message.group_id;
        self.active_group(group_id).await?;
        let member = self.require_member(group_id, actor_id).await?;
        let now = self.deps.clock.now();
        let event = ServerEvent::GroupMessageDeleted {
            group_id,
            message_id: message.id,
            for_everyone: request.for_everyone,
        };

        if !request.for_everyone {
            self.deps
                .message_repository
                .hide_for_user(message.id, actor_id, now)
                .await?;
            self.deps
                .fanout
                .send_to_connection(caller.connection_id, &event);
            return Ok(());
        }

        let (_guard, _) = self.lock_active_group(group_id).await?;
        // 等锁期间消息可能已被置顶或删除
        let mut message = self.load_message(message.id, Some(group_id)).await?;
        let was_pinned = message.is_pinned;
        message.delete_for_everyone(actor_id, member.is_admin(), now)?;
        self.deps
            .message_repository
            .mark_deleted_for_everyone(message.id, now)
            .await?;

        let member_ids = self.member_ids(group_id).await?;
        self.deps.fanout.send_to_users(member_ids.iter().copied(), &event, None);
        if was_pinned {
            self.deps.fanout.send_to_users(
                member_ids,
                &ServerEvent::MessageUnpinned {
                    group_id,
                    message_id: Some(message.id),
                    unpinned_by: actor_id,
                },
                None,
            );
        }
        Ok(())
    }

    pub async fn group_typing(
        &self,
        caller: &Caller,
        group_id: Uuid,
        is_typing: bool,
    ) -> Result<(), ApplicationError> {
        self.active_group(group_id).await?;
        self.require_member(group_id, caller.user_id()).await?;
        let member_ids = self.member_ids(group_id).await?;
        self.deps.fanout.send_to_users(
            member_ids,
            &ServerEvent::Typing {
                conversation_id: None,
                group_id: Some(group_id),
                user_id: caller.user_id(),
                is_typing,
            },
            Some(caller.user_id()),
        );
        Ok(())
    }

    /// 仅管理员；目标需通过授权闸门，且与现有成员之间不存在屏蔽关系
    pub async fn add_member(
        &self,
        caller: &Caller,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<GroupMember, ApplicationError> {
        let actor_id = caller.user_id();
        let (_guard, group) = self.lock_active_group(group_id).await?;

        self.require_admin(group_id, actor_id, "add members").await?;
        let members = self.deps.member_repository.list(group_id).await?;
        if members.iter().any(|m| m.user_id == user_id) {
            return Err(ApplicationError::validation(
                ErrorCode::AlreadyMember,
                "User is already a member of this group",
            ));
        }
        if !group.has_capacity_for(members.len() as u32 + 1) {
            return Err(ApplicationError::validation(
                ErrorCode::GroupFull,
                format!("This group is full ({} members)", group.max_members),
            ));
        }

        self.deps.gate.can_message(actor_id, user_id).await?;
        for existing in members.iter().filter(|m| m.user_id != actor_id) {
            if self.deps.gate.is_blocked(user_id, existing.user_id).await {
                return Err(ApplicationError::authorization(
                    ErrorCode::UserBlocked,
                    "This user cannot join the group",
                ));
            }
        }

        let member = GroupMember::new(group_id, user_id, GroupRole::Member, self.deps.clock.now());
        let member = self.deps.member_repository.add(&member).await?;

        self.deps.fanout.send_to_users(
            members.iter().map(|m| m.user_id),
            &ServerEvent::MemberAdded {
                group_id,
                member: member.clone(),
                added_by: actor_id,
            },
            None,
        );
        self.deps.fanout.send_to_user(
            user_id,
            &ServerEvent::AddedToGroup {
                group,
                added_by: actor_id,
            },
        );
        tracing::info!(group_id = %group_id, user_id = %user_id, added_by = %actor_id, "成员已加入群组");
        Ok(member)
    }

    /// 管理员移除成员；移除自己等同于退出
    pub async fn remove_member(
        &self,
        caller: &Caller,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ApplicationError> {
        let actor_id = caller.user_id();
        if user_id == actor_id {
            return self.leave_group(caller, group_id).await;
        }
        let (_guard, _) = self.lock_active_group(group_id).await?;

        self.require_admin(group_id, actor_id, "remove members").await?;
        if !self.deps.member_repository.remove(group_id, user_id).await? {
            return Err(ApplicationError::validation(
                ErrorCode::NotGroupMember,
                "User is not a member of this group",
            ));
        }

        self.deps.fanout.send_to_user(
            user_id,
            &ServerEvent::RemovedFromGroup {
                group_id,
                removed_by: actor_id,
            },
        );
        let remaining = self.member_ids(group_id).await?;
        self.deps.fanout.send_to_users(
            remaining,
            &ServerEvent::MemberRemoved {
                group_id,
                user_id,
                removed_by: actor_id,
            },
            None,
        );
        tracing::info!(group_id = %group_id, user_id = %user_id, removed_by = %actor_id, "成员已被移除");
        Ok(())
    }

    /// 最后一位管理员退出时群组随之软删除
    pub async fn leave_group(&self, caller: &Caller, group_id: Uuid) -> Result<(), ApplicationError> {
        let user_id = caller.user_id();
        let (_guard, group) = self.lock_active_group(group_id).await?;

        let member = self.require_member(group_id, user_id).await?;
        let members = self.deps.member_repository.list(group_id).await?;
        let admins = members.iter().filter(|m| m.is_admin()).count();
        let member_ids: Vec<Uuid> = members.iter().map(|m| m.user_id).collect();

        if member.is_admin() && admins == 1 {
            tracing::info!(group_id = %group_id, user_id = %user_id, "最后一位管理员退出，删除群组");
            self.transition(&group, Some(user_id), &member_ids, false)
                .await?;
            self.deps.member_repository.remove(group_id, user_id).await?;
            return Ok(());
        }

        self.deps.member_repository.remove(group_id, user_id).await?;
        self.deps
            .fanout
            .send_to_connection(caller.connection_id, &ServerEvent::LeftGroup { group_id });
        self.deps.fanout.send_to_users(
            member_ids,
            &ServerEvent::MemberLeft { group_id, user_id },
            Some(user_id),
        );
        Ok(())
    }

    pub async fn promote_member(
        &self,
        caller: &Caller,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ApplicationError> {
        self.change_role(caller, group_id, user_id, GroupRole::Admin)
            .await
    }

    pub async fn demote_member(
        &self,
        caller: &Caller,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ApplicationError> {
        if user_id == caller.user_id() {
            return Err(ApplicationError::validation(
                ErrorCode::CannotDemoteSelf,
                "Admins cannot demote themselves",
            ));
        }
        self.change_role(caller, group_id, user_id, GroupRole::Member)
            .await
    }

    async fn change_role(
        &self,
        caller: &Caller,
        group_id: Uuid,
        user_id: Uuid,
        role: GroupRole,
    ) -> Result<(), ApplicationError> {
        let actor_id = caller.user_id();
        let (_guard, _) = self.lock_active_group(group_id).await?;

        self.require_admin(group_id, actor_id, "change member roles")
            .await?;
        let mut target = self
            .deps
            .member_repository
            .find(group_id, user_id)
            .await?
            .ok_or_else(|| {
                ApplicationError::validation(
                    ErrorCode::NotGroupMember,
                    "User is not a member of this group",
                )
            })?;
        match role {
            GroupRole::Admin => target.promote(),
            GroupRole::Member => target.demote(),
        }
        self.deps
            .member_repository
            .update_role(group_id, user_id, target.role)
            .await?;

        let member_ids = self.member_ids(group_id).await?;
        self.deps.fanout.send_to_users(
            member_ids,
            &ServerEvent::MemberRoleChanged {
                group_id,
                user_id,
                role: target.role,
                changed_by: actor_id,
            },
            None,
        );
        tracing::info!(group_id = %group_id, user_id = %user_id, role = target.role.as_str(), changed_by = %actor_id, "成员角色已变更");
        Ok(())
    }

    /// 单槽置顶：新置顶替换旧置顶
    pub async fn pin_message(
        &self,
        caller: &Caller,
        group_id: Uuid,
        message_id: Uuid,
    ) -> Result<GroupMessage, ApplicationError> {
        let actor_id = caller.user_id();
        let (_guard, _) = self.lock_active_group(group_id).await?;

        self.require_admin(group_id, actor_id, "pin messages").await?;
        let mut message = self.load_message(message_id, Some(group_id)).await?;
        let now = self.deps.clock.now();
        message.pin(actor_id, now)?;
        self.deps
            .message_repository
            .pin(group_id, message.id, actor_id, now)
            .await?;

        let member_ids = self.member_ids(group_id).await?;
        self.deps.fanout.send_to_users(
            member_ids,
            &ServerEvent::MessagePinned {
                group_id,
                message: message.clone(),
                pinned_by: actor_id,
            },
            None,
        );
        Ok(message)
    }

    pub async fn unpin_message(
        &self,
        caller: &Caller,
        group_id: Uuid,
    ) -> Result<Option<Uuid>, ApplicationError> {
        let actor_id = caller.user_id();
        let (_guard, _) = self.lock_active_group(group_id).await?;

        self.require_admin(group_id, actor_id, "unpin messages").await?;
        let unpinned = self.deps.message_repository.unpin(group_id).await?;

        let member_ids = self.member_ids(group_id).await?;
        self.deps.fanout.send_to_users(
            member_ids,
            &ServerEvent::MessageUnpinned {
                group_id,
                message_id: unpinned,
                unpinned_by: actor_id,
            },
            None,
        );
        Ok(unpinned)
    }

    /// 公告：普通群消息 + 置顶，在群组锁内完成
    pub async fn send_announcement(
        &self,
        caller: &Caller,
        group_id: Uuid,
        content: String,
    ) -> Result<GroupMessage, ApplicationError> {
        let actor_id = caller.user_id();
        let (_guard, _) = self.lock_active_group(group_id).await?;

        self.require_admin(group_id, actor_id, "send announcements")
            .await?;
        let member_ids = self.member_ids(group_id).await?;
        let resolved = self.mentions_for(&content, actor_id, &member_ids).await;
        let now = self.deps.clock.now();
        let message =
            GroupMessage::announcement(group_id, actor_id, content, resolved.mentions.clone(), now)?;
        let mut message = self.store_new(&message).await?;

        message.pin(actor_id, now)?;
        self.deps
            .message_repository
            .pin(group_id, message.id, actor_id, now)
            .await?;

        self.deliver_new(caller, &message, &member_ids, &resolved.notify);
        self.deps.fanout.send_to_users(
            member_ids,
            &ServerEvent::MessagePinned {
                group_id,
                message: message.clone(),
                pinned_by: actor_id,
            },
            None,
        );
        Ok(message)
    }

    pub async fn delete_group(
        &self,
        caller: &Caller,
        group_id: Uuid,
        permanent: bool,
    ) -> Result<(), ApplicationError> {
        let actor_id = caller.user_id();
        let (_guard, group) = self.lock_active_group(group_id).await?;

        self.require_admin(group_id, actor_id, "delete the group")
            .await?;
        let member_ids = self.member_ids(group_id).await?;
        self.transition(&group, Some(actor_id), &member_ids, permanent)
            .await
    }

    /// 先广播 group_deleted，再执行状态迁移
    async fn transition(
        &self,
        group: &Group,
        deleted_by: Option<Uuid>,
        member_ids: &[Uuid],
        permanent: bool,
    ) -> Result<(), ApplicationError> {
        let now = self.deps.clock.now();
        let next = if permanent {
            group.lifecycle.hard_delete(now)?
        } else {
            group.lifecycle.soft_delete(now)?
        };

        self.deps.fanout.send_to_users(
            member_ids.iter().copied(),
            &ServerEvent::GroupDeleted {
                group_id: group.group_id,
                permanent,
                deleted_by,
            },
            None,
        );

        if permanent {
            self.deps.group_repository.purge(group.group_id, now).await?;
            self.deps.index.evict_group(group.group_id);
        } else {
            self.deps
                .group_repository
                .update_lifecycle(group.group_id, &next)
                .await?;
        }
        tracing::info!(group_id = %group.group_id, state = next.as_str(), deleted_by = ?deleted_by, "群组状态已变更");
        Ok(())
    }

    /// 清理宽限期已过的软删除群组，返回清理数量
    pub async fn purge_expired_groups(&self) -> Result<usize, ApplicationError> {
        let now = self.deps.clock.now();
        let grace = self.deps.grace_period;
        let candidates = self
            .deps
            .group_repository
            .list_soft_deleted_before(now - grace)
            .await?;

        let mut purged = 0;
        for group in candidates {
            if !group.lifecycle.is_purge_due(now, grace) {
                continue;
            }
            let _guard = self.locks.lock(group.group_id).await;
            // 持锁后重新确认仍处于到期的软删除状态
            match self.deps.group_repository.find_by_id(group.group_id).await {
                Ok(Some(current)) if current.lifecycle.is_purge_due(now, grace) => {}
                Ok(_) => continue,
                Err(err) => {
                    tracing::warn!(group_id = %group.group_id, error = %err, "群组清理失败，下次重试");
                    continue;
                }
            }
            match self.deps.group_repository.purge(group.group_id, now).await {
                Ok(()) => {
                    self.deps.index.evict_group(group.group_id);
                    purged += 1;
                }
                Err(err) => {
                    tracing::warn!(group_id = %group.group_id, error = %err, "群组清理失败，下次重试");
                }
            }
        }
        if purged > 0 {
            tracing::info!(purged, "过期群组已清理");
        }
        Ok(purged)
    }

    pub async fn add_reaction(
        &self,
        caller: &Caller,
        message_id: Uuid,
        reaction: &str,
    ) -> Result<bool, ApplicationError> {
        let user_id = caller.user_id();
        let message = self.load_message(message_id, None).await?;
        self.active_group(message.group_id).await?;
        self.require_member(message.group_id, user_id).await?;
        if message.deleted_for_everyone {
            return Err(ApplicationError::validation(
                ErrorCode::ValidationError,
                "Cannot react to a deleted message",
            ));
        }

        let reaction = Reaction::new(message.id, user_id, reaction, self.deps.clock.now())?;
        let added = self.deps.reaction_repository.add(&reaction).await?;
        if added {
            let member_ids = self.member_ids(message.group_id).await?;
            self.deps.fanout.send_to_users(
                member_ids,
                &ServerEvent::ReactionAdded {
                    message_id: message.id,
                    user_id,
                    reaction: reaction.reaction,
                    conversation_id: None,
                    group_id: Some(message.group_id),
                },
                Some(user_id),
            );
        }
        Ok(added)
    }

    pub async fn remove_reaction(
        &self,
        caller: &Caller,
        message_id: Uuid,
        reaction: &str,
    ) -> Result<bool, ApplicationError> {
        let user_id = caller.user_id();
        let message = self.load_message(message_id, None).await?;
        self.active_group(message.group_id).await?;
        self.require_member(message.group_id, user_id).await?;
        let reaction = normalize_reaction(reaction)?;

        let removed = self
            .deps
            .reaction_repository
            .remove(message.id, user_id, &reaction)
            .await?;
        if removed {
            let member_ids = self.member_ids(message.group_id).await?;
            self.deps.fanout.send_to_users(
                member_ids,
                &ServerEvent::ReactionRemoved {
                    message_id: message.id,
                    user_id,
                    reaction,
                    conversation_id: None,
                    group_id: Some(message.group_id),
                },
                Some(user_id),
            );
        }
        Ok(removed)
    }
}
