//! 授权闸门
//!
//! 两个独立谓词：`is_blocked`（对称）与 `follows`（有向）。
//! 底层存储出错时放行（fail open），并以 warn 级别记录，便于审计。

use std::collections::HashSet;
use std::sync::Arc;

use domain::SocialGraphRepository;
use uuid::Uuid;

use crate::error::{ApplicationError, ErrorCode};

/// 候选成员筛选结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateScreening {
    pub allowed: Vec<Uuid>,
    pub excluded: Vec<(Uuid, ErrorCode)>,
}

#[derive(Clone)]
pub struct AuthorizationGate {
    social_graph: Arc<dyn SocialGraphRepository>,
}

impl AuthorizationGate {
    pub fn new(social_graph: Arc<dyn SocialGraphRepository>) -> Self {
        Self { social_graph }
    }

    /// 任一方向屏蔽即为 true；存储错误时放行
    pub async fn is_blocked(&self, a: Uuid, b: Uuid) -> bool {
        match self.social_graph.is_blocked(a, b).await {
            Ok(blocked) => blocked,
            Err(err) => {
                tracing::warn!(user_a = %a, user_b = %b, error = %err, "屏蔽关系查询失败，按放行处理");
                false
            }
        }
    }

    /// `follower` 是否关注 `followee`；存储错误时放行
    pub async fn follows(&self, follower: Uuid, followee: Uuid) -> bool {
        match self.social_graph.follows(follower, followee).await {
            Ok(follows) => follows,
            Err(err) => {
                tracing::warn!(follower = %follower, followee = %followee, error = %err, "关注关系查询失败，按放行处理");
                true
            }
        }
    }

    pub async fn ensure_not_blocked(&self, a: Uuid, b: Uuid) -> Result<(), ApplicationError> {
        if self.is_blocked(a, b).await {
            return Err(ApplicationError::authorization(
                ErrorCode::UserBlocked,
                "You cannot interact with this user",
            ));
        }
        Ok(())
    }

    /// `canMessage = !isBlocked && follows`
    pub async fn can_message(&self, sender: Uuid, recipient: Uuid) -> Result<(), ApplicationError> {
        self.ensure_not_blocked(sender, recipient).await?;
        if !self.follows(sender, recipient).await {
            return Err(ApplicationError::authorization(
                ErrorCode::NotFollowing,
                "You must follow this user to message them",
            ));
        }
        Ok(())
    }

    /// 逐个检查候选人，丢弃被屏蔽或未关注的候选人并记录原因
    pub async fn screen_candidates(&self, actor: Uuid, candidates: &[Uuid]) -> CandidateScreening {
        let mut screening = CandidateScreening::default();
        for candidate in candidates.iter().copied() {
            match self.can_message(actor, candidate).await {
                Ok(()) => screening.allowed.push(candidate),
                Err(err) => {
                    tracing::info!(actor = %actor, candidate = %candidate, code = err.code().as_str(), "候选成员被排除");
                    screening.excluded.push((candidate, err.code()));
                }
            }
        }
        screening
    }

    /// 与 `user_id` 存在屏蔽关系的用户集合；存储错误时返回空集
    pub async fn blocked_set(&self, user_id: Uuid) -> HashSet<Uuid> {
        match self.social_graph.blocked_user_ids(user_id).await {
            Ok(ids) => ids.into_iter().collect(),
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "屏蔽列表查询失败，按放行处理");
                HashSet::new()
            }
        }
    }
}
