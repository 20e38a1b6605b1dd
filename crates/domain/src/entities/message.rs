//! 消息实体定义
//!
//! 私聊消息与群组消息共用同一形状：群组消息把 `recipientId` 复用为群组ID，
//! 并以 `isGroupMessage` 区分。

use crate::entities::conversation::ConversationId;
use crate::errors::{DomainError, DomainResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 消息最大长度（字符）
pub const MAX_MESSAGE_LENGTH: usize = 5000;

/// 发送后允许编辑的时间窗口（分钟）
pub const EDIT_WINDOW_MINUTES: i64 = 5;

/// 存储层密文；明文列此时为空
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedContent {
    pub ciphertext: String,
    pub iv: String,
}

/// 验证消息内容
pub fn validate_content(content: &str) -> DomainResult<()> {
    if content.trim().is_empty() {
        return Err(DomainError::validation_error("content", "消息内容不能为空"));
    }
    if content.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(DomainError::validation_error(
            "content",
            format!("消息内容长度不能超过{}个字符", MAX_MESSAGE_LENGTH),
        ));
    }
    Ok(())
}

/// 编辑规则：只有发送者，且在窗口期内
fn ensure_editable(
    sender_id: Uuid,
    editor_id: Uuid,
    sent_at: DateTime<Utc>,
    deleted: bool,
    now: DateTime<Utc>,
) -> DomainResult<()> {
    if editor_id != sender_id {
        return Err(DomainError::permission_denied("只有发送者可以编辑消息"));
    }
    if deleted {
        return Err(DomainError::business_rule_violation("已删除的消息不能编辑"));
    }
    if now - sent_at > Duration::minutes(EDIT_WINDOW_MINUTES) {
        return Err(DomainError::EditWindowExpired {
            limit_minutes: EDIT_WINDOW_MINUTES,
        });
    }
    Ok(())
}

/// 私聊消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessage {
    pub id: Uuid,
    pub conversation_id: ConversationId,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    #[serde(skip)]
    pub encrypted: Option<EncryptedContent>,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
    pub reply_to: Option<Uuid>,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_for_everyone: bool,
}

impl PrivateMessage {
    pub fn new(
        sender_id: Uuid,
        recipient_id: Uuid,
        content: impl Into<String>,
        reply_to: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let content = content.into();
        validate_content(&content)?;
        Ok(Self {
            id: Uuid::new_v4(),
            conversation_id: ConversationId::between(sender_id, recipient_id),
            sender_id,
            recipient_id,
            content,
            encrypted: None,
            timestamp: now,
            is_read: false,
            reply_to,
            edited: false,
            edited_at: None,
            deleted: false,
            deleted_at: None,
            deleted_for_everyone: false,
        })
    }

    /// 编辑消息，失败时内容保持不变
    pub fn edit(
        &mut self,
        editor_id: Uuid,
        new_content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        ensure_editable(self.sender_id, editor_id, self.timestamp, self.deleted, now)?;
        let new_content = new_content.into();
        validate_content(&new_content)?;
        self.content = new_content;
        self.encrypted = None;
        self.edited = true;
        self.edited_at = Some(now);
        Ok(())
    }

    /// 对所有人删除：仅发送者可执行
    pub fn delete_for_everyone(&mut self, actor_id: Uuid, now: DateTime<Utc>) -> DomainResult<()> {
        if actor_id != self.sender_id {
            return Err(DomainError::permission_denied("只有发送者可以对所有人删除消息"));
        }
        self.mark_deleted(now);
        Ok(())
    }

    pub(crate) fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.content.clear();
        self.encrypted = None;
        self.deleted = true;
        self.deleted_at = Some(now);
        self.deleted_for_everyone = true;
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.sender_id == user_id || self.recipient_id == user_id
    }
}

/// @提及目标：具体用户或 "everyone" 哨兵
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Mention {
    Everyone,
    User(Uuid),
}

pub const MENTION_EVERYONE: &str = "everyone";

impl fmt::Display for Mention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mention::Everyone => f.write_str(MENTION_EVERYONE),
            Mention::User(id) => write!(f, "{}", id),
        }
    }
}

impl TryFrom<String> for Mention {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == MENTION_EVERYONE {
            return Ok(Mention::Everyone);
        }
        Uuid::parse_str(&value)
            .map(Mention::User)
            .map_err(|_| DomainError::validation_error("mentions", "无效的提及目标"))
    }
}

impl From<Mention> for String {
    fn from(value: Mention) -> Self {
        value.to_string()
    }
}

/// 群组消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessage {
    pub id: Uuid,
    pub group_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    #[serde(skip)]
    pub encrypted: Option<EncryptedContent>,
    pub timestamp: DateTime<Utc>,
    pub reply_to: Option<Uuid>,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_for_everyone: bool,
    pub is_group_message: bool,
    pub is_announcement: bool,
    pub is_pinned: bool,
    pub pinned_at: Option<DateTime<Utc>>,
    pub pinned_by_user_id: Option<Uuid>,
    pub mentions: Vec<Mention>,
}

impl GroupMessage {
    pub fn new(
        group_id: Uuid,
        sender_id: Uuid,
        content: impl Into<String>,
        reply_to: Option<Uuid>,
        mentions: Vec<Mention>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let content = content.into();
        validate_content(&content)?;
        Ok(Self {
            id: Uuid::new_v4(),
            group_id,
            sender_id,
            content,
            encrypted: None,
            timestamp: now,
            reply_to,
            edited: false,
            edited_at: None,
            deleted: false,
            deleted_at: None,
            deleted_for_everyone: false,
            is_group_message: true,
            is_announcement: false,
            is_pinned: false,
            pinned_at: None,
            pinned_by_user_id: None,
            mentions,
        })
    }

    /// 公告消息；置顶由同一操作中的存储步骤完成，以保证单槽
    pub fn announcement(
        group_id: Uuid,
        sender_id: Uuid,
        content: impl Into<String>,
        mentions: Vec<Mention>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let mut message = Self::new(group_id, sender_id, content, None, mentions, now)?;
        message.is_announcement = true;
        Ok(message)
    }

    pub fn edit(
        &mut self,
        editor_id: Uuid,
        new_content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        ensure_editable(self.sender_id, editor_id, self.timestamp, self.deleted, now)?;
        let new_content = new_content.into();
        validate_content(&new_content)?;
        self.content = new_content;
        self.encrypted = None;
        self.edited = true;
        self.edited_at = Some(now);
        Ok(())
    }

    /// 对所有人删除：发送者或群管理员
    pub fn delete_for_everyone(
        &mut self,
        actor_id: Uuid,
        actor_is_admin: bool,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if actor_id != self.sender_id && !actor_is_admin {
            return Err(DomainError::permission_denied(
                "只有发送者或管理员可以对所有人删除消息",
            ));
        }
        self.content.clear();
        self.encrypted = None;
        self.deleted = true;
        self.deleted_at = Some(now);
        self.deleted_for_everyone = true;
        self.unpin();
        Ok(())
    }

    pub fn pin(&mut self, pinned_by: Uuid, now: DateTime<Utc>) -> DomainResult<()> {
        if self.deleted_for_everyone {
            return Err(DomainError::business_rule_violation("已删除的消息不能置顶"));
        }
        self.is_pinned = true;
        self.pinned_at = Some(now);
        self.pinned_by_user_id = Some(pinned_by);
        Ok(())
    }

    pub fn unpin(&mut self) {
        self.is_pinned = false;
        self.pinned_at = None;
        self.pinned_by_user_id = None;
    }

    pub fn mentions_user(&self, user_id: Uuid) -> bool {
        self.mentions
            .iter()
            .any(|m| matches!(m, Mention::Everyone) || *m == Mention::User(user_id))
    }
}
