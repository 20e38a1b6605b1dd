//! 群组实体定义
//!
//! 群组生命周期显式建模为枚举：`Active -> SoftDeleted -> HardDeleted`，
//! 也允许 `Active -> HardDeleted`（永久删除）。其余转换一律拒绝。

use crate::errors::{DomainError, DomainResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// 群组名称最大长度
pub const MAX_GROUP_NAME_LENGTH: usize = 100;

/// 群组最少容量（创建者 + 1）
pub const MIN_GROUP_CAPACITY: u32 = 2;

/// 软删除后的宽限期（天）
pub const DEFAULT_GRACE_PERIOD_DAYS: i64 = 30;

/// 群组生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GroupLifecycle {
    Active,
    SoftDeleted { deleted_at: DateTime<Utc> },
    HardDeleted { deleted_at: DateTime<Utc> },
}

impl GroupLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupLifecycle::Active => "active",
            GroupLifecycle::SoftDeleted { .. } => "soft_deleted",
            GroupLifecycle::HardDeleted { .. } => "hard_deleted",
        }
    }

    /// 从存储列还原
    pub fn from_parts(state: &str, deleted_at: Option<DateTime<Utc>>) -> DomainResult<Self> {
        match (state, deleted_at) {
            ("active", _) => Ok(GroupLifecycle::Active),
            ("soft_deleted", Some(deleted_at)) => Ok(GroupLifecycle::SoftDeleted { deleted_at }),
            ("hard_deleted", Some(deleted_at)) => Ok(GroupLifecycle::HardDeleted { deleted_at }),
            _ => Err(DomainError::validation_error(
                "lifecycle",
                format!("无效的群组状态: {}", state),
            )),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, GroupLifecycle::Active)
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            GroupLifecycle::Active => None,
            GroupLifecycle::SoftDeleted { deleted_at } | GroupLifecycle::HardDeleted { deleted_at } => {
                Some(*deleted_at)
            }
        }
    }

    /// Active -> SoftDeleted
    pub fn soft_delete(self, now: DateTime<Utc>) -> DomainResult<Self> {
        match self {
            GroupLifecycle::Active => Ok(GroupLifecycle::SoftDeleted { deleted_at: now }),
            other => Err(other.invalid_transition("soft_deleted")),
        }
    }

    /// Active | SoftDeleted -> HardDeleted
    pub fn hard_delete(self, now: DateTime<Utc>) -> DomainResult<Self> {
        match self {
            GroupLifecycle::Active | GroupLifecycle::SoftDeleted { .. } => {
                Ok(GroupLifecycle::HardDeleted { deleted_at: now })
            }
            other => Err(other.invalid_transition("hard_deleted")),
        }
    }

    /// 软删除已超过宽限期，可被清理任务提升为硬删除
    pub fn is_purge_due(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        match self {
            GroupLifecycle::SoftDeleted { deleted_at } => now - *deleted_at >= grace,
            _ => false,
        }
    }

    fn invalid_transition(&self, to: &str) -> DomainError {
        DomainError::InvalidGroupTransition {
            from: self.as_str().to_string(),
            to: to.to_string(),
        }
    }
}

/// 群组实体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub group_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub creator_id: Uuid,
    pub max_members: u32,
    pub lifecycle: GroupLifecycle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        creator_id: Uuid,
        max_members: u32,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation_error("name", "群组名称不能为空"));
        }
        if trimmed.chars().count() > MAX_GROUP_NAME_LENGTH {
            return Err(DomainError::validation_error(
                "name",
                format!("群组名称长度不能超过{}个字符", MAX_GROUP_NAME_LENGTH),
            ));
        }
        if max_members < MIN_GROUP_CAPACITY {
            return Err(DomainError::validation_error(
                "maxMembers",
                format!("群组容量至少为{}", MIN_GROUP_CAPACITY),
            ));
        }

        Ok(Self {
            group_id: Uuid::new_v4(),
            name: trimmed.to_string(),
            description: description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            creator_id,
            max_members,
            lifecycle: GroupLifecycle::Active,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle.is_active()
    }

    /// 包含创建者在内的成员总数能否容纳
    pub fn has_capacity_for(&self, member_count: u32) -> bool {
        member_count <= self.max_members
    }
}

/// 群成员角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    #[default]
    Member,
    Admin,
}

impl GroupRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupRole::Member => "member",
            GroupRole::Admin => "admin",
        }
    }
}

impl FromStr for GroupRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(GroupRole::Member),
            "admin" => Ok(GroupRole::Admin),
            other => Err(DomainError::validation_error(
                "role",
                format!("无效的成员角色: {}", other),
            )),
        }
    }
}

/// 群成员
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub role: GroupRole,
    pub can_send_messages: bool,
    pub can_add_members: bool,
    pub joined_at: DateTime<Utc>,
}

impl GroupMember {
    pub fn new(group_id: Uuid, user_id: Uuid, role: GroupRole, now: DateTime<Utc>) -> Self {
        Self {
            group_id,
            user_id,
            role,
            can_send_messages: true,
            can_add_members: role == GroupRole::Admin,
            joined_at: now,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == GroupRole::Admin
    }

    pub fn promote(&mut self) {
        self.role = GroupRole::Admin;
        self.can_add_members = true;
    }

    pub fn demote(&mut self) {
        self.role = GroupRole::Member;
        self.can_add_members = false;
    }
}
