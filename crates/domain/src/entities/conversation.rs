//! 私聊会话实体
//!
//! 会话ID由双方用户ID排序后确定性生成（`conv_{min}_{max}`），
//! 任意一方无需查询即可计算出相同的ID。

use crate::errors::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const CONVERSATION_PREFIX: &str = "conv_";

/// 确定性会话ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId {
    low: Uuid,
    high: Uuid,
}

impl ConversationId {
    /// 由两个参与者计算会话ID，与参数顺序无关
    pub fn between(a: Uuid, b: Uuid) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn parse(raw: &str) -> DomainResult<Self> {
        let invalid = || DomainError::validation_error("conversationId", "会话ID格式无效");
        let rest = raw.strip_prefix(CONVERSATION_PREFIX).ok_or_else(invalid)?;
        let (first, second) = rest.split_once('_').ok_or_else(invalid)?;
        let first = Uuid::parse_str(first).map_err(|_| invalid())?;
        let second = Uuid::parse_str(second).map_err(|_| invalid())?;
        Ok(Self::between(first, second))
    }

    pub fn participants(&self) -> (Uuid, Uuid) {
        (self.low, self.high)
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.low == user_id || self.high == user_id
    }

    /// 返回对方用户ID；非参与者返回 None
    pub fn counterpart(&self, user_id: Uuid) -> Option<Uuid> {
        if self.low == user_id {
            Some(self.high)
        } else if self.high == user_id {
            Some(self.low)
        } else {
            None
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}_{}", CONVERSATION_PREFIX, self.low, self.high)
    }
}

impl TryFrom<String> for ConversationId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ConversationId> for String {
    fn from(value: ConversationId) -> Self {
        value.to_string()
    }
}

/// 会话记录，首次使用时惰性创建
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn new(a: Uuid, b: Uuid, now: DateTime<Utc>) -> DomainResult<Self> {
        if a == b {
            return Err(DomainError::validation_error(
                "recipientId",
                "不能与自己建立会话",
            ));
        }
        Ok(Self {
            id: ConversationId::between(a, b),
            created_at: now,
            last_message_at: None,
            deleted_at: None,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(ConversationId::between(a, b), ConversationId::between(b, a));

        let (low, high) = if a < b { (a, b) } else { (b, a) };
        assert_eq!(
            ConversationId::between(a, b).to_string(),
            format!("conv_{}_{}", low, high)
        );
    }

    #[test]
    fn conversation_id_parses_back() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let id = ConversationId::between(a, b);
        let parsed = ConversationId::parse(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
        assert!(parsed.involves(a));
        assert_eq!(parsed.counterpart(a), Some(b));
        assert_eq!(parsed.counterpart(Uuid::new_v4()), None);
    }

    #[test]
    fn conversation_id_rejects_garbage() {
        assert!(ConversationId::parse("conv_abc").is_err());
        assert!(ConversationId::parse("room_1_2").is_err());

        let json = serde_json::to_string(&ConversationId::between(Uuid::nil(), Uuid::max())).unwrap();
        assert_eq!(
            json,
            "\"conv_00000000-0000-0000-0000-000000000000_ffffffff-ffff-ffff-ffff-ffffffffffff\""
        );
    }

    #[test]
    fn self_conversation_is_rejected() {
        let a = Uuid::new_v4();
        assert!(Conversation::new(a, a, Utc::now()).is_err());
    }
}
