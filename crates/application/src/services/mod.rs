mod conversation_service;
mod group_service;
mod progression_service;

use domain::UserProfile;
use uuid::Uuid;

use crate::connection::ConnectionId;

pub use conversation_service::{
    ConversationService, ConversationServiceDependencies, DeletePrivateMessageRequest,
    EditPrivateMessageRequest, SendPrivateMessageRequest,
};
pub use group_service::{
    CreateGroupRequest, DeleteGroupMessageRequest, EditGroupMessageRequest, GroupService,
    GroupServiceDependencies, SendGroupMessageRequest,
};
pub use progression_service::{
    CommunityPayload, EventPayload, MemberPayload, ProgressPayload, ProgressionService,
    ProgressionServiceDependencies, ProgressionSyncRequest, ProgressionSyncResponse,
};

/// 已认证的调用方：用户身份及其当前连接
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: UserProfile,
    pub connection_id: ConnectionId,
}

impl Caller {
    pub fn new(user: UserProfile, connection_id: ConnectionId) -> Self {
        Self {
            user,
            connection_id,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user.user_id
    }
}
