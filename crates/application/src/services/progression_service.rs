//! 社区进度同步
//!
//! 外部服务通过 HTTP 推送社区、成员、挑战事件与进度快照。
//! 事件按 `eventId` 幂等；进度快照覆盖写入；有变化时向社区在线成员广播。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use domain::{
    ChallengeEvent, Community, CommunityMember, CommunityRepository, ProgressSnapshot,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::Validate;

use crate::{
    broadcaster::BroadcastFanout,
    clock::Clock,
    error::{ApplicationError, ErrorCode},
    locks::KeyedLocks,
    protocol::ServerEvent,
};

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CommunityPayload {
    #[validate(length(min = 1, max = 128))]
    pub id: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MemberPayload {
    pub user_id: Uuid,
    #[validate(length(max = 32))]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[validate(length(min = 1, max = 128))]
    pub event_id: String,
    pub user_id: Option<Uuid>,
    pub challenge_id: Option<String>,
    #[validate(range(min = 0))]
    pub xp_awarded: Option<i64>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub payload: Option<JsonValue>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub user_id: Option<Uuid>,
    #[validate(range(min = 0))]
    pub xp: i64,
    #[validate(range(min = 0))]
    pub current_streak: i32,
    #[validate(range(min = 0))]
    pub longest_streak: i32,
    pub last_challenge_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionSyncRequest {
    pub user_id: Option<Uuid>,
    pub community_id: Option<String>,
    #[validate(nested)]
    pub community: Option<CommunityPayload>,
    #[serde(default)]
    #[validate(nested)]
    pub members: Vec<MemberPayload>,
    #[validate(nested)]
    pub event: Option<EventPayload>,
    #[validate(nested)]
    pub progress: Option<ProgressPayload>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionSyncResponse {
    pub community: Community,
    pub members: Vec<CommunityMember>,
    pub event: Option<ChallengeEvent>,
    pub event_recorded: bool,
    pub progress: Option<ProgressSnapshot>,
    pub broadcasts_delivered: usize,
}

pub struct ProgressionServiceDependencies {
    pub community_repository: Arc<dyn CommunityRepository>,
    pub clock: Arc<dyn Clock>,
    pub fanout: BroadcastFanout,
}

pub struct ProgressionService {
    deps: ProgressionServiceDependencies,
    // 同一 (社区, 用户) 的快照读改写串行执行
    locks: KeyedLocks<(String, Uuid)>,
}

impl ProgressionService {
    pub fn new(deps: ProgressionServiceDependencies) -> Self {
        Self {
            deps,
            locks: KeyedLocks::new(),
        }
    }

    /// 当前持有或等待中的快照锁数量
    pub fn pending_locks(&self) -> usize {
        self.locks.len()
    }

    pub async fn sync(
        &self,
        request: ProgressionSyncRequest,
    ) -> Result<ProgressionSyncResponse, ApplicationError> {
        request.validate().map_err(|errors| {
            ApplicationError::validation(ErrorCode::ValidationError, errors.to_string())
        })?;
        let now = self.deps.clock.now();
        let repo = &self.deps.community_repository;

        let community_id = resolve_community_id(&request)?;
        let community = match &request.community {
            Some(payload) => {
                repo.upsert_community(&Community {
                    community_id: community_id.clone(),
                    name: payload.name.trim().to_string(),
                    description: payload.description.clone(),
                    metadata: payload
                        .metadata
                        .clone()
                        .unwrap_or_else(|| JsonValue::Object(Default::default())),
                    updated_at: now,
                })
                .await?
            }
            None => repo
                .find_community(&community_id)
                .await?
                .ok_or_else(|| ApplicationError::not_found("community", &community_id))?,
        };

        let mut members = Vec::with_capacity(request.members.len() + 1);
        for payload in &request.members {
            let member =
                CommunityMember::new(&community_id, payload.user_id, payload.role.clone(), now);
            members.push(repo.ensure_member(&member).await?);
        }
        if let Some(acting) = request.user_id {
            if !members.iter().any(|m| m.user_id == acting) {
                let member = CommunityMember::new(&community_id, acting, None, now);
                members.push(repo.ensure_member(&member).await?);
            }
        }

        let mut subject = request.user_id;
        let mut event = None;
        let mut event_recorded = false;
        if let Some(payload) = &request.event {
            let user_id = payload
                .user_id
                .or(request.user_id)
                .ok_or_else(|| missing_user("event"))?;
            let recorded = repo
                .record_event(&ChallengeEvent {
                    event_id: payload.event_id.clone(),
                    community_id: community_id.clone(),
                    user_id,
                    challenge_id: payload.challenge_id.clone(),
                    xp_awarded: payload.xp_awarded.unwrap_or(0),
                    payload: payload
                        .payload
                        .clone()
                        .unwrap_or_else(|| JsonValue::Object(Default::default())),
                    occurred_at: payload.occurred_at.unwrap_or(now),
                    recorded_at: now,
                })
                .await?;
            if !recorded.newly_recorded {
                tracing::debug!(event_id = %recorded.event.event_id, community_id = %community_id, "重复事件，忽略");
            }
            subject = Some(user_id);
            event_recorded = recorded.newly_recorded;
            event = Some(recorded.event);
        }

        let mut progress = None;
        let mut progress_changed = false;
        if let Some(payload) = &request.progress {
            let user_id = payload
                .user_id
                .or(request.user_id)
                .or(subject)
                .ok_or_else(|| missing_user("progress"))?;
            let _guard = self.locks.lock((community_id.clone(), user_id)).await;

            let previous = repo.find_progress(&community_id, user_id).await?;
            let snapshot = ProgressSnapshot {
                community_id: community_id.clone(),
                user_id,
                xp: payload.xp,
                current_streak: payload.current_streak,
                longest_streak: payload.longest_streak,
                last_challenge_id: payload.last_challenge_id.clone(),
                updated_at: now,
            };
            progress_changed = previous.map_or(true, |p| !p.same_state(&snapshot));
            progress = Some(repo.upsert_progress(&snapshot).await?);
            subject = Some(user_id);
        } else if let Some(recorded) = &event {
            let _guard = self.locks.lock((community_id.clone(), recorded.user_id)).await;

            let current = repo.find_progress(&community_id, recorded.user_id).await?;
            if event_recorded {
                let mut snapshot = current.unwrap_or_else(|| {
                    ProgressSnapshot::empty(&community_id, recorded.user_id, now)
                });
                snapshot.apply_event(recorded, now);
                progress = Some(repo.upsert_progress(&snapshot).await?);
                progress_changed = true;
            } else {
                progress = current;
            }
        }

        let mut broadcasts_delivered = 0;
        if let (true, Some(user_id)) = (event_recorded || progress_changed, subject) {
            let recipients = repo.list_member_ids(&community_id).await?;
            broadcasts_delivered = self.deps.fanout.send_to_users(
                recipients,
                &ServerEvent::CommunityProgressUpdate {
                    community_id: community_id.clone(),
                    user_id,
                    event: event.clone(),
                    progress: progress.clone(),
                },
                None,
            );
        }

        tracing::info!(
            community_id = %community_id,
            members = members.len(),
            event_recorded,
            progress_changed,
            broadcasts_delivered,
            "社区进度已同步"
        );

        Ok(ProgressionSyncResponse {
            community,
            members,
            event,
            event_recorded,
            progress,
            broadcasts_delivered,
        })
    }
}

fn resolve_community_id(request: &ProgressionSyncRequest) -> Result<String, ApplicationError> {
    let inline = request.community.as_ref().map(|c| c.id.trim().to_string());
    let explicit = request
        .community_id
        .as_ref()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());
    match (inline, explicit) {
        (Some(a), Some(b)) if a != b => Err(ApplicationError::validation(
            ErrorCode::ValidationError,
            "communityId does not match community.id",
        )),
        (Some(id), _) | (None, Some(id)) => Ok(id),
        (None, None) => Err(ApplicationError::validation(
            ErrorCode::ValidationError,
            "communityId is required",
        )),
    }
}

fn missing_user(section: &str) -> ApplicationError {
    ApplicationError::validation(
        ErrorCode::ValidationError,
        format!("{} userId is required when no acting userId is given", section),
    )
}
