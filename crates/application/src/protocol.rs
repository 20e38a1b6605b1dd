//! WebSocket 线协议
//!
//! 所有入站/出站单元都是带 `type` 判别字段的 JSON 对象；出站消息附带 `timestamp`。

use chrono::{DateTime, Utc};
use domain::{
    ChallengeEvent, ConversationId, Group, GroupMember, GroupMessage, GroupRole, PrivateMessage,
    ProgressSnapshot, UserProfile,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;

/// 客户端消息
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEnvelope {
    Authenticate {
        token: String,
    },
    Ping,
    GetOnlineUsers,
    StartConversation {
        recipient_id: Uuid,
    },
    SendPrivateMessage {
        recipient_id: Uuid,
        content: String,
        #[serde(default)]
        reply_to: Option<Uuid>,
    },
    EditPrivateMessage {
        message_id: Uuid,
        content: String,
        #[serde(default)]
        conversation_id: Option<ConversationId>,
    },
    DeletePrivateMessage {
        message_id: Uuid,
        #[serde(default)]
        for_everyone: bool,
        #[serde(default)]
        conversation_id: Option<ConversationId>,
    },
    DeleteConversation {
        conversation_id: ConversationId,
        #[serde(default)]
        for_everyone: bool,
    },
    MarkRead {
        conversation_id: ConversationId,
        #[serde(default)]
        message_ids: Option<Vec<Uuid>>,
    },
    Typing {
        recipient_id: Uuid,
        is_typing: bool,
    },
    AddReaction {
        message_id: Uuid,
        reaction: String,
    },
    RemoveReaction {
        message_id: Uuid,
        reaction: String,
    },
    CreateGroup {
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        initial_members: Vec<Uuid>,
        #[serde(default)]
        max_members: Option<u32>,
    },
    GetGroups,
    GetGroupHistory {
        group_id: Uuid,
        #[serde(default)]
        limit: Option<usize>,
    },
    SendGroupMessage {
        group_id: Uuid,
        content: String,
        #[serde(default)]
        reply_to: Option<Uuid>,
    },
    EditGroupMessage {
        message_id: Uuid,
        content: String,
        #[serde(default)]
        group_id: Option<Uuid>,
    },
    DeleteGroupMessage {
        message_id: Uuid,
        #[serde(default)]
        for_everyone: bool,
        #[serde(default)]
        group_id: Option<Uuid>,
    },
    GroupTyping {
        group_id: Uuid,
        is_typing: bool,
    },
    AddGroupMember {
        group_id: Uuid,
        user_id: Uuid,
    },
    RemoveGroupMember {
        group_id: Uuid,
        user_id: Uuid,
    },
    LeaveGroup {
        group_id: Uuid,
    },
    PromoteMember {
        group_id: Uuid,
        user_id: Uuid,
    },
    DemoteMember {
        group_id: Uuid,
        user_id: Uuid,
    },
    PinMessage {
        group_id: Uuid,
        message_id: Uuid,
    },
    UnpinMessage {
        group_id: Uuid,
    },
    SendAnnouncement {
        group_id: Uuid,
        content: String,
    },
    DeleteGroup {
        group_id: Uuid,
        #[serde(default)]
        permanent: bool,
    },
}

impl ClientEnvelope {
    /// 用于日志与指标的类型名
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEnvelope::Authenticate { .. } => "authenticate",
            ClientEnvelope::Ping => "ping",
            ClientEnvelope::GetOnlineUsers => "get_online_users",
            ClientEnvelope::StartConversation { .. } => "start_conversation",
            ClientEnvelope::SendPrivateMessage { .. } => "send_private_message",
            ClientEnvelope::EditPrivateMessage { .. } => "edit_private_message",
            ClientEnvelope::DeletePrivateMessage { .. } => "delete_private_message",
            ClientEnvelope::DeleteConversation { .. } => "delete_conversation",
            ClientEnvelope::MarkRead { .. } => "mark_read",
            ClientEnvelope::Typing { .. } => "typing",
            ClientEnvelope::AddReaction { .. } => "add_reaction",
            ClientEnvelope::RemoveReaction { .. } => "remove_reaction",
            ClientEnvelope::CreateGroup { .. } => "create_group",
            ClientEnvelope::GetGroups => "get_groups",
            ClientEnvelope::GetGroupHistory { .. } => "get_group_history",
            ClientEnvelope::SendGroupMessage { .. } => "send_group_message",
            ClientEnvelope::EditGroupMessage { .. } => "edit_group_message",
            ClientEnvelope::DeleteGroupMessage { .. } => "delete_group_message",
            ClientEnvelope::GroupTyping { .. } => "group_typing",
            ClientEnvelope::AddGroupMember { .. } => "add_group_member",
            ClientEnvelope::RemoveGroupMember { .. } => "remove_group_member",
            ClientEnvelope::LeaveGroup { .. } => "leave_group",
            ClientEnvelope::PromoteMember { .. } => "promote_member",
            ClientEnvelope::DemoteMember { .. } => "demote_member",
            ClientEnvelope::PinMessage { .. } => "pin_message",
            ClientEnvelope::UnpinMessage { .. } => "unpin_message",
            ClientEnvelope::SendAnnouncement { .. } => "send_announcement",
            ClientEnvelope::DeleteGroup { .. } => "delete_group",
        }
    }
}

/// 服务端事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    AuthSuccess {
        user: UserProfile,
        online_users: Vec<UserProfile>,
    },
    SessionConflict {
        message: String,
    },
    UserOnline {
        user: UserProfile,
    },
    UserOffline {
        user_id: Uuid,
    },
    OnlineUsers {
        users: Vec<UserProfile>,
    },
    Pong,
    ConversationStarted {
        conversation_id: ConversationId,
        participant_id: Uuid,
        messages: Vec<PrivateMessage>,
    },
    PrivateMessageSent {
        message: PrivateMessage,
    },
    NewPrivateMessage {
        message: PrivateMessage,
    },
    PrivateMessageEdited {
        message: PrivateMessage,
    },
    PrivateMessageDeleted {
        conversation_id: ConversationId,
        message_id: Uuid,
        for_everyone: bool,
    },
    ConversationDeleted {
        conversation_id: ConversationId,
        for_everyone: bool,
    },
    MessagesRead {
        conversation_id: ConversationId,
        reader_id: Uuid,
        message_ids: Vec<Uuid>,
    },
    Typing {
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<Uuid>,
        user_id: Uuid,
        is_typing: bool,
    },
    ReactionAdded {
        message_id: Uuid,
        user_id: Uuid,
        reaction: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<Uuid>,
    },
    ReactionRemoved {
        message_id: Uuid,
        user_id: Uuid,
        reaction: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<Uuid>,
    },
    GroupCreated {
        group: Group,
        members: Vec<GroupMember>,
        excluded_members: Vec<Uuid>,
    },
    AddedToGroup {
        group: Group,
        added_by: Uuid,
    },
    GroupList {
        groups: Vec<Group>,
    },
    GroupHistory {
        group_id: Uuid,
        messages: Vec<GroupMessage>,
        pinned_message: Option<GroupMessage>,
    },
    GroupMessageSent {
        message: GroupMessage,
    },
    NewGroupMessage {
        message: GroupMessage,
    },
    Mentioned {
        group_id: Uuid,
        message: GroupMessage,
    },
    GroupMessageEdited {
        message: GroupMessage,
    },
    GroupMessageDeleted {
        group_id: Uuid,
        message_id: Uuid,
        for_everyone: bool,
    },
    MemberAdded {
        group_id: Uuid,
        member: GroupMember,
        added_by: Uuid,
    },
    MemberRemoved {
        group_id: Uuid,
        user_id: Uuid,
        removed_by: Uuid,
    },
    RemovedFromGroup {
        group_id: Uuid,
        removed_by: Uuid,
    },
    MemberLeft {
        group_id: Uuid,
        user_id: Uuid,
    },
    LeftGroup {
        group_id: Uuid,
    },
    MemberRoleChanged {
        group_id: Uuid,
        user_id: Uuid,
        role: GroupRole,
        changed_by: Uuid,
    },
    MessagePinned {
        group_id: Uuid,
        message: GroupMessage,
        pinned_by: Uuid,
    },
    MessageUnpinned {
        group_id: Uuid,
        message_id: Option<Uuid>,
        unpinned_by: Uuid,
    },
    GroupDeleted {
        group_id: Uuid,
        permanent: bool,
        deleted_by: Option<Uuid>,
    },
    CommunityProgressUpdate {
        community_id: String,
        user_id: Uuid,
        event: Option<ChallengeEvent>,
        progress: Option<ProgressSnapshot>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>, code: ErrorCode) -> Self {
        ServerEvent::Error {
            message: message.into(),
            details: None,
            code: Some(code),
        }
    }
}

/// 出站信封：事件字段与 `timestamp` 平铺在同一对象中
#[derive(Debug, Serialize)]
pub struct OutboundEnvelope<'a> {
    #[serde(flatten)]
    pub event: &'a ServerEvent,
    pub timestamp: DateTime<Utc>,
}

impl<'a> OutboundEnvelope<'a> {
    pub fn encode(event: &'a ServerEvent, timestamp: DateTime<Utc>) -> serde_json::Result<String> {
        serde_json::to_string(&OutboundEnvelope { event, timestamp })
    }
}
