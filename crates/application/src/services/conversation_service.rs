use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use domain::{
    normalize_reaction, Conversation, ConversationId, ConversationRepository, PrivateMessage,
    PrivateMessageRepository, Reaction, ReactionRepository,
};
use uuid::Uuid;

use crate::{
    authorization::AuthorizationGate,
    broadcaster::BroadcastFanout,
    cache::EvictionQueue,
    cipher::{reveal, seal, MessageCipher},
    clock::Clock,
    error::{ApplicationError, ErrorCode},
    index::{MessageIndex, MessageLocation},
    locks::KeyedLocks,
    protocol::ServerEvent,
    services::Caller,
};

#[derive(Debug, Clone)]
pub struct SendPrivateMessageRequest {
    pub recipient_id: Uuid,
    pub content: String,
    pub reply_to: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct EditPrivateMessageRequest {
    pub message_id: Uuid,
    pub content: String,
    pub conversation_id: Option<ConversationId>,
}

#[derive(Debug, Clone)]
pub struct DeletePrivateMessageRequest {
    pub message_id: Uuid,
    pub for_everyone: bool,
    pub conversation_id: Option<ConversationId>,
}

pub struct ConversationServiceDependencies {
    pub gate: AuthorizationGate,
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn PrivateMessageRepository>,
    pub reaction_repository: Arc<dyn ReactionRepository>,
    pub cipher: Arc<dyn MessageCipher>,
    pub clock: Arc<dyn Clock>,
    pub fanout: BroadcastFanout,
    pub index: Arc<MessageIndex>,
    pub tail_capacity: usize,
    pub history_limit: usize,
    /// 最多保留内存尾部的会话数
    pub max_cached_conversations: usize,
}

/// 会话的内存尾部：最近 N 条消息与单方删除标记
#[derive(Debug, Default)]
struct ConversationTail {
    messages: VecDeque<PrivateMessage>,
    hidden: HashSet<(Uuid, Uuid)>,
    cleared_at: HashMap<Uuid, DateTime<Utc>>,
}

impl ConversationTail {
    fn visible_to(&self, viewer: Uuid, limit: usize) -> Vec<PrivateMessage> {
        let cleared_at = self.cleared_at.get(&viewer).copied();
        let visible: Vec<_> = self
            .messages
            .iter()
            .filter(|m| !self.hidden.contains(&(m.id, viewer)))
            .filter(|m| cleared_at.map_or(true, |at| m.timestamp > at))
            .cloned()
            .collect();
        let skip = visible.len().saturating_sub(limit);
        visible.into_iter().skip(skip).collect()
    }
}

pub struct ConversationService {
    deps: ConversationServiceDependencies,
    tails: DashMap<ConversationId, ConversationTail>,
    tail_eviction: EvictionQueue<ConversationId>,
    // 同一会话的发送与已读串行执行
    locks: KeyedLocks<ConversationId>,
}

impl ConversationService {
    pub fn new(deps: ConversationServiceDependencies) -> Self {
        let tail_eviction = EvictionQueue::new(deps.max_cached_conversations);
        Self {
            deps,
            tails: DashMap::new(),
            tail_eviction,
            locks: KeyedLocks::new(),
        }
    }

    /// 取得会话尾部，新建时按容量淘汰最早缓存的会话
    fn tail_mut(
        &self,
        conversation_id: &ConversationId,
    ) -> dashmap::mapref::one::RefMut<'_, ConversationId, ConversationTail> {
        if !self.tails.contains_key(conversation_id) {
            for evicted in self.tail_eviction.admit(conversation_id.clone()) {
                if &evicted != conversation_id {
                    self.tails.remove(&evicted);
                }
            }
        }
        self.tails.entry(conversation_id.clone()).or_default()
    }

    fn drop_tail(&self, conversation_id: &ConversationId) {
        self.tails.remove(conversation_id);
        self.tail_eviction.forget(|id| id == conversation_id);
    }

    fn ensure_participant(
        conversation_id: &ConversationId,
        user_id: Uuid,
    ) -> Result<Uuid, ApplicationError> {
        conversation_id.counterpart(user_id).ok_or_else(|| {
            ApplicationError::authorization(
                ErrorCode::InsufficientPermissions,
                "You are not a participant of this conversation",
            )
        })
    }

    pub async fn start_conversation(
        &self,
        caller: &Caller,
        recipient_id: Uuid,
    ) -> Result<Vec<PrivateMessage>, ApplicationError> {
        let sender_id = caller.user_id();
        let now = self.deps.clock.now();
        let conversation = Conversation::new(sender_id, recipient_id, now)?;
        self.deps.gate.can_message(sender_id, recipient_id).await?;

        let conversation = self
            .deps
            .conversation_repository
            .upsert(&conversation)
            .await?;
        let messages = self.history(&conversation.id, sender_id).await?;

        self.deps.fanout.send_to_connection(
            caller.connection_id,
            &ServerEvent::ConversationStarted {
                conversation_id: conversation.id.clone(),
                participant_id: recipient_id,
                messages: messages.clone(),
            },
        );
        Ok(messages)
    }

    /// 最近历史：存储为准，存储不可用时退回内存尾部
    async fn history(
        &self,
        conversation_id: &ConversationId,
        viewer_id: Uuid,
    ) -> Result<Vec<PrivateMessage>, ApplicationError> {
        let limit = self.deps.history_limit;
        let durable = async {
            let since = self
                .deps
                .conversation_repository
                .find_user_deletion(conversation_id, viewer_id)
                .await?;
            self.deps
                .message_repository
                .recent(conversation_id, viewer_id, since, limit)
                .await
        };

        match durable.await {
            Ok(messages) => {
                let messages: Vec<_> = messages
                    .into_iter()
                    .map(|m| reveal(self.deps.cipher.as_ref(), m))
                    .collect();
                for message in &messages {
                    self.deps.index.record(
                        message.id,
                        MessageLocation::Conversation(conversation_id.clone()),
                    );
                }
                self.warm_tail(conversation_id, &messages);
                Ok(messages)
            }
            Err(err) => {
                let fallback = self
                    .tails
                    .get(conversation_id)
                    .map(|tail| tail.visible_to(viewer_id, limit));
                match fallback {
                    Some(messages) if !messages.is_empty() => {
                        tracing::warn!(conversation_id = %conversation_id, error = %err, "历史查询失败，使用内存尾部");
                        Ok(messages)
                    }
                    _ => Err(err.into()),
                }
            }
        }
    }

    fn warm_tail(&self, conversation_id: &ConversationId, messages: &[PrivateMessage]) {
        let mut tail = self.tail_mut(conversation_id);
        if tail.messages.is_empty() {
            let skip = messages.len().saturating_sub(self.deps.tail_capacity);
            tail.messages.extend(messages.iter().skip(skip).cloned());
        }
    }

    fn push_tail(&self, message: &PrivateMessage) {
        let mut tail = self.tail_mut(&message.conversation_id);
        tail.messages.push_back(message.clone());
        while tail.messages.len() > self.deps.tail_capacity {
            if let Some(dropped) = tail.messages.pop_front() {
                tail.hidden.retain(|(message_id, _)| *message_id != dropped.id);
            }
        }
    }

    fn update_tail<F>(&self, conversation_id: &ConversationId, mut apply: F)
    where
        F: FnMut(&mut ConversationTail),
    {
        if let Some(mut tail) = self.tails.get_mut(conversation_id) {
            apply(&mut tail);
        }
    }

    fn replace_in_tail(&self, message: &PrivateMessage) {
        self.update_tail(&message.conversation_id, |tail| {
            if let Some(slot) = tail.messages.iter_mut().find(|m| m.id == message.id) {
                *slot = message.clone();
            }
        });
    }

    pub async fn send_message(
        &self,
        caller: &Caller,
        request: SendPrivateMessageRequest,
    ) -> Result<PrivateMessage, ApplicationError> {
        let sender_id = caller.user_id();
        let recipient_id = request.recipient_id;
        let now = self.deps.clock.now();

        let conversation = Conversation::new(sender_id, recipient_id, now)?;
        self.deps.gate.can_message(sender_id, recipient_id).await?;
        let message = PrivateMessage::new(
            sender_id,
            recipient_id,
            request.content,
            request.reply_to,
            now,
        )?;

        let _guard = self.locks.lock(conversation.id.clone()).await;

        if let Some(reply_to) = request.reply_to {
            let target = self.find_message(reply_to).await?;
            if target.map(|m| m.conversation_id) != Some(conversation.id.clone()) {
                return Err(ApplicationError::not_found("message", reply_to));
            }
        }

        self.deps
            .conversation_repository
            .upsert(&conversation)
            .await?;
        let sealed = seal(self.deps.cipher.as_ref(), &message)?;
        let stored = self.deps.message_repository.insert(&sealed).await?;
        let message = reveal(self.deps.cipher.as_ref(), stored);

        if let Err(err) = self
            .deps
            .conversation_repository
            .touch(&conversation.id, now)
            .await
        {
            tracing::warn!(conversation_id = %conversation.id, error = %err, "更新会话时间失败");
        }

        self.push_tail(&message);
        self.deps.index.record(
            message.id,
            MessageLocation::Conversation(conversation.id.clone()),
        );

        // 先确认发送者，再投递接收者
        self.deps.fanout.send_to_connection(
            caller.connection_id,
            &ServerEvent::PrivateMessageSent {
                message: message.clone(),
            },
        );
        let delivered = self.deps.fanout.send_to_user(
            recipient_id,
            &ServerEvent::NewPrivateMessage {
                message: message.clone(),
            },
        );
        tracing::debug!(message_id = %message.id, conversation_id = %conversation.id, delivered, "私聊消息已发送");

        Ok(message)
    }

    /// 按主键加载并回填索引
    pub async fn find_message(
        &self,
        message_id: Uuid,
    ) -> Result<Option<PrivateMessage>, ApplicationError> {
        let Some(message) = self.deps.message_repository.find_by_id(message_id).await? else {
            return Ok(None);
        };
        self.deps.index.record(
            message.id,
            MessageLocation::Conversation(message.conversation_id.clone()),
        );
        Ok(Some(reveal(self.deps.cipher.as_ref(), message)))
    }

    /// 加载调用方可见的消息；容器ID不符或非参与者一律视为不存在
    async fn load_for_participant(
        &self,
        caller: &Caller,
        message_id: Uuid,
        conversation_hint: Option<&ConversationId>,
    ) -> Result<PrivateMessage, ApplicationError> {
        let message = self
            .find_message(message_id)
            .await?
            .filter(|m| m.is_participant(caller.user_id()))
            .filter(|m| conversation_hint.map_or(true, |hint| *hint == m.conversation_id))
            .ok_or_else(|| ApplicationError::not_found("message", message_id))?;
        Ok(message)
    }

    pub async fn edit_message(
        &self,
        caller: &Caller,
        request: EditPrivateMessageRequest,
    ) -> Result<PrivateMessage, ApplicationError> {
        let mut message = self
            .load_for_participant(caller, request.message_id, request.conversation_id.as_ref())
            .await?;
        message.edit(caller.user_id(), request.content, self.deps.clock.now())?;

        let sealed = seal(self.deps.cipher.as_ref(), &message)?;
        self.deps.message_repository.update_content(&sealed).await?;
        self.replace_in_tail(&message);

        let event = ServerEvent::PrivateMessageEdited {
            message: message.clone(),
        };
        self.deps
            .fanout
            .send_to_connection(caller.connection_id, &event);
        self.deps.fanout.send_to_user(message.recipient_id, &event);
        Ok(message)
    }

    pub async fn delete_message(
        &self,
        caller: &Caller,
        request: DeletePrivateMessageRequest,
    ) -> Result<(), ApplicationError> {
        let actor_id = caller.user_id();
        let mut message = self
            .load_for_participant(caller, request.message_id, request.conversation_id.as_ref())
            .await?;
        let now = self.deps.clock.now();
        let event = ServerEvent::PrivateMessageDeleted {
            conversation_id: message.conversation_id.clone(),
            message_id: message.id,
            for_everyone: request.for_everyone,
        };

        if request.for_everyone {
            message.delete_for_everyone(actor_id, now)?;
            self.deps
                .message_repository
                .mark_deleted_for_everyone(message.id, now)
                .await?;
            self.replace_in_tail(&message);

            self.deps
                .fanout
                .send_to_connection(caller.connection_id, &event);
            self.deps.fanout.send_to_user(message.recipient_id, &event);
        } else {
            self.deps
                .message_repository
                .hide_for_user(message.id, actor_id, now)
                .await?;
            self.update_tail(&message.conversation_id, |tail| {
                tail.hidden.insert((message.id, actor_id));
            });
            self.deps
                .fanout
                .send_to_connection(caller.connection_id, &event);
        }
        Ok(())
    }

    pub async fn delete_conversation(
        &self,
        caller: &Caller,
        conversation_id: &ConversationId,
        for_everyone: bool,
    ) -> Result<(), ApplicationError> {
        let actor_id = caller.user_id();
        let counterpart = Self::ensure_participant(conversation_id, actor_id)?;
        self.deps
            .conversation_repository
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("conversation", conversation_id))?;

        let now = self.deps.clock.now();
        let event = ServerEvent::ConversationDeleted {
            conversation_id: conversation_id.clone(),
            for_everyone,
        };

        if for_everyone {
            let removed = self
                .deps
                .conversation_repository
                .delete_for_everyone(conversation_id, now)
                .await?;
            self.drop_tail(conversation_id);
            self.deps.index.evict_conversation(conversation_id);
            tracing::info!(conversation_id = %conversation_id, actor = %actor_id, removed, "会话已对双方删除");

            self.deps
                .fanout
                .send_to_connection(caller.connection_id, &event);
            self.deps.fanout.send_to_user(counterpart, &event);
        } else {
            self.deps
                .conversation_repository
                .record_user_deletion(conversation_id, actor_id, now)
                .await?;
            self.update_tail(conversation_id, |tail| {
                tail.cleared_at.insert(actor_id, now);
            });
            self.deps
                .fanout
                .send_to_connection(caller.connection_id, &event);
        }
        Ok(())
    }

    /// 标记已读：只影响发给调用方的消息，并通知对方
    pub async fn mark_read(
        &self,
        caller: &Caller,
        conversation_id: &ConversationId,
        message_ids: Option<Vec<Uuid>>,
    ) -> Result<Vec<Uuid>, ApplicationError> {
        let reader_id = caller.user_id();
        let counterpart = Self::ensure_participant(conversation_id, reader_id)?;

        let _guard = self.locks.lock(conversation_id.clone()).await;

        let updated = self
            .deps
            .message_repository
            .mark_read(conversation_id, reader_id, message_ids)
            .await?;
        if updated.is_empty() {
            return Ok(updated);
        }

        let updated_set: HashSet<Uuid> = updated.iter().copied().collect();
        self.update_tail(conversation_id, |tail| {
            for message in tail
                .messages
                .iter_mut()
                .filter(|m| updated_set.contains(&m.id))
            {
                message.is_read = true;
            }
        });

        self.deps.fanout.send_to_user(
            counterpart,
            &ServerEvent::MessagesRead {
                conversation_id: conversation_id.clone(),
                reader_id,
                message_ids: updated.clone(),
            },
        );
        Ok(updated)
    }

    pub async fn typing(
        &self,
        caller: &Caller,
        recipient_id: Uuid,
        is_typing: bool,
    ) -> Result<(), ApplicationError> {
        let user_id = caller.user_id();
        if user_id == recipient_id {
            return Err(ApplicationError::validation(
                ErrorCode::ValidationError,
                "Cannot send typing indicator to yourself",
            ));
        }
        let conversation_id = ConversationId::between(user_id, recipient_id);
        self.deps
            .conversation_repository
            .find_by_id(&conversation_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("conversation", &conversation_id))?;
        self.deps.gate.ensure_not_blocked(user_id, recipient_id).await?;

        self.deps.fanout.send_to_user(
            recipient_id,
            &ServerEvent::Typing {
                conversation_id: Some(conversation_id),
                group_id: None,
                user_id,
                is_typing,
            },
        );
        Ok(())
    }

    pub async fn add_reaction(
        &self,
        caller: &Caller,
        message_id: Uuid,
        reaction: &str,
    ) -> Result<bool, ApplicationError> {
        let user_id = caller.user_id();
        let message = self.load_for_participant(caller, message_id, None).await?;
        if message.deleted_for_everyone {
            return Err(ApplicationError::validation(
                ErrorCode::ValidationError,
                "Cannot react to a deleted message",
            ));
        }

        let reaction = Reaction::new(message.id, user_id, reaction, self.deps.clock.now())?;
        let added = self.deps.reaction_repository.add(&reaction).await?;
        if added {
            self.notify_counterpart(
                &message,
                user_id,
                ServerEvent::ReactionAdded {
                    message_id: message.id,
                    user_id,
                    reaction: reaction.reaction.clone(),
                    conversation_id: Some(message.conversation_id.clone()),
                    group_id: None,
                },
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
        let message = self.load_for_participant(caller, message_id, None).await?;
        let reaction = normalize_reaction(reaction)?;

        let removed = self
            .deps
            .reaction_repository
            .remove(message.id, user_id, &reaction)
            .await?;
        if removed {
            self.notify_counterpart(
                &message,
                user_id,
                ServerEvent::ReactionRemoved {
                    message_id: message.id,
                    user_id,
                    reaction,
                    conversation_id: Some(message.conversation_id.clone()),
                    group_id: None,
                },
            );
        }
        Ok(removed)
    }

    fn notify_counterpart(&self, message: &PrivateMessage, actor_id: Uuid, event: ServerEvent) {
        if let Some(counterpart) = message.conversation_id.counterpart(actor_id) {
            self.deps.fanout.send_to_user(counterpart, &event);
        }
    }

    /// 当前缓存尾部的会话数
    pub fn cached_conversations(&self) -> usize {
        self.tails.len()
    }

    pub fn pending_locks(&self) -> usize {
        self.locks.len()
    }

    /// 内存尾部中的消息数（测试与诊断用）
    pub fn cached_tail_len(&self, conversation_id: &ConversationId) -> usize {
        self.tails
            .get(conversation_id)
            .map(|tail| tail.messages.len())
            .unwrap_or(0)
    }
}
