//! 消息表情回应

use crate::errors::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 回应内容最大长度（字符）
pub const MAX_REACTION_LENGTH: usize = 10;

/// `(messageId, userId, reaction)` 三元组唯一，与消息归属无关
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub reaction: String,
    pub created_at: DateTime<Utc>,
}

impl Reaction {
    pub fn new(
        message_id: Uuid,
        user_id: Uuid,
        reaction: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Ok(Self {
            message_id,
            user_id,
            reaction: normalize_reaction(reaction)?,
            created_at: now,
        })
    }
}

/// 去除首尾空白并校验长度
pub fn normalize_reaction(reaction: &str) -> DomainResult<String> {
    let trimmed = reaction.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation_error("reaction", "回应不能为空"));
    }
    if trimmed.chars().count() > MAX_REACTION_LENGTH {
        return Err(DomainError::validation_error(
            "reaction",
            format!("回应长度不能超过{}个字符", MAX_REACTION_LENGTH),
        ));
    }
    Ok(trimmed.to_string())
}
