//! 用户身份
//!
//! 用户由外部认证服务解析，消息核心只关心标识与展示字段。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 已认证用户的资料，连接生命周期内缓存在连接上
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl UserProfile {
    pub fn new(user_id: Uuid, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            display_name: None,
            avatar_url: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// 用户名比较不区分大小写（用于 @提及 解析）
    pub fn username_matches(&self, candidate: &str) -> bool {
        self.username.to_lowercase() == candidate.to_lowercase()
    }
}
