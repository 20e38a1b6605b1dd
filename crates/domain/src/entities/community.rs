//! 社区与进度实体
//!
//! 挑战事件以 `eventId` 幂等记录；进度快照按 `(communityId, userId)` 覆盖写入。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    pub community_id: String,
    pub name: String,
    pub description: Option<String>,
    pub metadata: JsonValue,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityMember {
    pub community_id: String,
    pub user_id: Uuid,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

impl CommunityMember {
    pub const DEFAULT_ROLE: &'static str = "member";

    pub fn new(
        community_id: impl Into<String>,
        user_id: Uuid,
        role: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            community_id: community_id.into(),
            user_id,
            role: role
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| Self::DEFAULT_ROLE.to_string()),
            joined_at: now,
        }
    }
}

/// 挑战完成事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeEvent {
    pub event_id: String,
    pub community_id: String,
    pub user_id: Uuid,
    pub challenge_id: Option<String>,
    pub xp_awarded: i64,
    pub payload: JsonValue,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

/// 事件写入结果；重放时 `newly_recorded` 为 false，返回首次写入的事件
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub event: ChallengeEvent,
    pub newly_recorded: bool,
}

/// 进度快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub community_id: String,
    pub user_id: Uuid,
    pub xp: i64,
    pub current_streak: i32,
    pub longest_streak: i32,
    pub last_challenge_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn empty(community_id: impl Into<String>, user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            community_id: community_id.into(),
            user_id,
            xp: 0,
            current_streak: 0,
            longest_streak: 0,
            last_challenge_id: None,
            updated_at: now,
        }
    }

    /// 忽略更新时间比较状态
    pub fn same_state(&self, other: &ProgressSnapshot) -> bool {
        self.xp == other.xp
            && self.current_streak == other.current_streak
            && self.longest_streak == other.longest_streak
            && self.last_challenge_id == other.last_challenge_id
    }

    /// 把新记录的事件计入快照；xp 在 `i64::MAX` 处饱和
    pub fn apply_event(&mut self, event: &ChallengeEvent, now: DateTime<Utc>) {
        self.xp = self.xp.saturating_add(event.xp_awarded.max(0));
        if event.challenge_id.is_some() {
            self.last_challenge_id = event.challenge_id.clone();
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_role_defaults() {
        let now = Utc::now();
        let member = CommunityMember::new("c1", Uuid::new_v4(), Some(" ".into()), now);
        assert_eq!(member.role, "member");
    }

    #[test]
    fn snapshot_comparison_ignores_timestamp() {
        let user = Uuid::new_v4();
        let a = ProgressSnapshot::empty("c1", user, Utc::now());
        let mut b = a.clone();
        b.updated_at = a.updated_at + chrono::Duration::seconds(5);
        assert!(a.same_state(&b));
        b.xp = 10;
        assert!(!a.same_state(&b));
    }

    #[test]
    fn applying_events_saturates_xp() {
        let now = Utc::now();
        let user = Uuid::new_v4();
        let mut snapshot = ProgressSnapshot::empty("c1", user, now);
        snapshot.xp = i64::MAX;
        let event = ChallengeEvent {
            event_id: "evt-overflow".into(),
            community_id: "c1".into(),
            user_id: user,
            challenge_id: Some("borrowck".into()),
            xp_awarded: 1,
            payload: serde_json::json!({}),
            occurred_at: now,
            recorded_at: now,
        };
        snapshot.apply_event(&event, now);
        assert_eq!(snapshot.xp, i64::MAX);
        assert_eq!(snapshot.last_challenge_id.as_deref(), Some("borrowck"));
    }
}
