//! 消息路由
//!
//! 解析入站帧，检查认证状态，按 `type` 分派到会话、私聊或群聊引擎。
//! 处理过程中的错误统一转成 `error` 事件发回调用方的连接。

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    broadcaster::BroadcastFanout,
    connection::ConnectionId,
    error::{ApplicationError, ErrorCode},
    index::{MessageIndex, MessageLocation},
    protocol::{ClientEnvelope, ServerEvent},
    services::{
        Caller, ConversationService, CreateGroupRequest, DeleteGroupMessageRequest,
        DeletePrivateMessageRequest, EditGroupMessageRequest, EditPrivateMessageRequest,
        GroupService, SendGroupMessageRequest, SendPrivateMessageRequest,
    },
    session::SessionRegistry,
};

pub struct MessageRouter {
    sessions: Arc<SessionRegistry>,
    conversations: Arc<ConversationService>,
    groups: Arc<GroupService>,
    index: Arc<MessageIndex>,
    fanout: BroadcastFanout,
}

impl MessageRouter {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        conversations: Arc<ConversationService>,
        groups: Arc<GroupService>,
        index: Arc<MessageIndex>,
        fanout: BroadcastFanout,
    ) -> Self {
        Self {
            sessions,
            conversations,
            groups,
            index,
            fanout,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// 处理一帧文本，返回消息类型（无法解析时为 None）
    pub async fn dispatch(&self, connection_id: ConnectionId, raw: &str) -> Option<&'static str> {
        let envelope = match serde_json::from_str::<ClientEnvelope>(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::debug!(connection_id = %connection_id, error = %err, "无法解析的入站消息");
                self.fanout.send_to_connection(
                    connection_id,
                    &ServerEvent::error("Invalid message format", ErrorCode::InvalidMessage),
                );
                return None;
            }
        };

        let kind = envelope.kind();
        if let Err(err) = self.route(connection_id, envelope).await {
            match &err {
                ApplicationError::Persistence(_) => {
                    tracing::error!(connection_id = %connection_id, kind, error = %err, "消息处理失败");
                }
                _ => {
                    tracing::debug!(connection_id = %connection_id, kind, code = err.code().as_str(), error = %err, "消息被拒绝");
                }
            }
            self.fanout.send_to_connection(connection_id, &err.to_event());
        }
        Some(kind)
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) {
        self.sessions.disconnect(connection_id).await;
    }

    fn caller(&self, connection_id: ConnectionId) -> Result<Caller, ApplicationError> {
        self.sessions
            .user_of(connection_id)
            .map(|user| Caller::new(user, connection_id))
            .ok_or_else(|| {
                ApplicationError::authorization(
                    ErrorCode::NotAuthenticated,
                    "Authenticate before sending messages",
                )
            })
    }

    async fn route(
        &self,
        connection_id: ConnectionId,
        envelope: ClientEnvelope,
    ) -> Result<(), ApplicationError> {
        match envelope {
            ClientEnvelope::Authenticate { token } => {
                self.sessions.authenticate(connection_id, &token).await?;
                Ok(())
            }
            // 心跳不要求认证
            ClientEnvelope::Ping => {
                self.fanout
                    .send_to_connection(connection_id, &ServerEvent::Pong);
                Ok(())
            }
            other => {
                let caller = self.caller(connection_id)?;
                self.route_authenticated(&caller, other).await
            }
        }
    }

    async fn route_authenticated(
        &self,
        caller: &Caller,
        envelope: ClientEnvelope,
    ) -> Result<(), ApplicationError> {
        match envelope {
            ClientEnvelope::Authenticate { .. } | ClientEnvelope::Ping => Ok(()),
            ClientEnvelope::GetOnlineUsers => {
                let users = self.sessions.online_users_for(caller.user_id()).await;
                self.fanout
                    .send_to_connection(caller.connection_id, &ServerEvent::OnlineUsers { users });
                Ok(())
            }

            // 私聊
            ClientEnvelope::StartConversation { recipient_id } => {
                self.conversations
                    .start_conversation(caller, recipient_id)
                    .await?;
                Ok(())
            }
            ClientEnvelope::SendPrivateMessage {
                recipient_id,
                content,
                reply_to,
            } => {
                self.conversations
                    .send_message(
                        caller,
                        SendPrivateMessageRequest {
                            recipient_id,
                            content,
                            reply_to,
                        },
                    )
                    .await?;
                Ok(())
            }
            ClientEnvelope::EditPrivateMessage {
                message_id,
                content,
                conversation_id,
            } => {
                self.conversations
                    .edit_message(
                        caller,
                        EditPrivateMessageRequest {
                            message_id,
                            content,
                            conversation_id,
                        },
                    )
                    .await?;
                Ok(())
            }
            ClientEnvelope::DeletePrivateMessage {
                message_id,
                for_everyone,
                conversation_id,
            } => {
                self.conversations
                    .delete_message(
                        caller,
                        DeletePrivateMessageRequest {
                            message_id,
                            for_everyone,
                            conversation_id,
                        },
                    )
                    .await
            }
            ClientEnvelope::DeleteConversation {
                conversation_id,
                for_everyone,
            } => {
                self.conversations
                    .delete_conversation(caller, &conversation_id, for_everyone)
                    .await
            }
            ClientEnvelope::MarkRead {
                conversation_id,
                message_ids,
            } => {
                self.conversations
                    .mark_read(caller, &conversation_id, message_ids)
                    .await?;
                Ok(())
            }
            ClientEnvelope::Typing {
                recipient_id,
                is_typing,
            } => {
                self.conversations
                    .typing(caller, recipient_id, is_typing)
                    .await
            }

            // 回应：先定位消息所在的会话或群组
            ClientEnvelope::AddReaction {
                message_id,
                reaction,
            } => {
                match self.locate(message_id).await? {
                    MessageLocation::Conversation(_) => {
                        self.conversations
                            .add_reaction(caller, message_id, &reaction)
                            .await?
                    }
                    MessageLocation::Group(_) => {
                        self.groups
                            .add_reaction(caller, message_id, &reaction)
                            .await?
                    }
                };
                Ok(())
            }
            ClientEnvelope::RemoveReaction {
                message_id,
                reaction,
            } => {
                match self.locate(message_id).await? {
                    MessageLocation::Conversation(_) => {
                        self.conversations
                            .remove_reaction(caller, message_id, &reaction)
                            .await?
                    }
                    MessageLocation::Group(_) => {
                        self.groups
                            .remove_reaction(caller, message_id, &reaction)
                            .await?
                    }
                };
                Ok(())
            }

            // 群聊
            ClientEnvelope::CreateGroup {
                name,
                description,
                initial_members,
                max_members,
            } => {
                self.groups
                    .create_group(
                        caller,
                        CreateGroupRequest {
                            name,
                            description,
                            initial_members,
                            max_members,
                        },
                    )
                    .await?;
                Ok(())
            }
            ClientEnvelope::GetGroups => {
                self.groups.list_groups(caller).await?;
                Ok(())
            }
            ClientEnvelope::GetGroupHistory { group_id, limit } => {
                self.groups.get_history(caller, group_id, limit).await?;
                Ok(())
            }
            ClientEnvelope::SendGroupMessage {
                group_id,
                content,
                reply_to,
            } => {
                self.groups
                    .send_group_message(
                        caller,
                        SendGroupMessageRequest {
                            group_id,
                            content,
                            reply_to,
                        },
                    )
                    .await?;
                Ok(())
            }
            ClientEnvelope::EditGroupMessage {
                message_id,
                content,
                group_id,
            } => {
                self.groups
                    .edit_group_message(
                        caller,
                        EditGroupMessageRequest {
                            message_id,
                            content,
                            group_id,
                        },
                    )
                    .await?;
                Ok(())
            }
            ClientEnvelope::DeleteGroupMessage {
                message_id,
                for_everyone,
                group_id,
            } => {
                self.groups
                    .delete_group_message(
                        caller,
                        DeleteGroupMessageRequest {
                            message_id,
                            for_everyone,
                            group_id,
                        },
                    )
                    .await
            }
            ClientEnvelope::GroupTyping {
                group_id,
                is_typing,
            } => self.groups.group_typing(caller, group_id, is_typing).await,
            ClientEnvelope::AddGroupMember { group_id, user_id } => {
                self.groups.add_member(caller, group_id, user_id).await?;
                Ok(())
            }
            ClientEnvelope::RemoveGroupMember { group_id, user_id } => {
                self.groups.remove_member(caller, group_id, user_id).await
            }
            ClientEnvelope::LeaveGroup { group_id } => self.groups.leave_group(caller, group_id).await,
            ClientEnvelope::PromoteMember { group_id, user_id } => {
                self.groups.promote_member(caller, group_id, user_id).await
            }
            ClientEnvelope::DemoteMember { group_id, user_id } => {
                self.groups.demote_member(caller, group_id, user_id).await
            }
            ClientEnvelope::PinMessage {
                group_id,
                message_id,
            } => {
                self.groups.pin_message(caller, group_id, message_id).await?;
                Ok(())
            }
            ClientEnvelope::UnpinMessage { group_id } => {
                self.groups.unpin_message(caller, group_id).await?;
                Ok(())
            }
            ClientEnvelope::SendAnnouncement { group_id, content } => {
                self.groups
                    .send_announcement(caller, group_id, content)
                    .await?;
                Ok(())
            }
            ClientEnvelope::DeleteGroup {
                group_id,
                permanent,
            } => self.groups.delete_group(caller, group_id, permanent).await,
        }
    }

    /// 索引未命中时依次按主键查私聊与群消息
    async fn locate(&self, message_id: Uuid) -> Result<MessageLocation, ApplicationError> {
        if let Some(location) = self.index.locate(message_id) {
            return Ok(location);
        }
        if let Some(message) = self.conversations.find_message(message_id).await? {
            return Ok(MessageLocation::Conversation(message.conversation_id));
        }
        if let Some(message) = self.groups.find_message(message_id).await? {
            return Ok(MessageLocation::Group(message.group_id));
        }
        Err(ApplicationError::not_found("message", message_id))
    }
}
