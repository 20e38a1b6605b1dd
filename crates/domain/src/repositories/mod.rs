//! Repository接口定义
//!
//! 定义数据访问层的抽象接口，遵循清洁架构原则，内层定义接口，外层实现接口。
//! 接口只做类型化的读写与 upsert，不含业务规则。

pub mod community_repository;
pub mod conversation_repository;
pub mod group_repository;
pub mod reaction_repository;
pub mod social_graph_repository;
pub mod user_repository;

pub use community_repository::CommunityRepository;
pub use conversation_repository::{ConversationRepository, PrivateMessageRepository};
pub use group_repository::{GroupMemberRepository, GroupMessageRepository, GroupRepository};
pub use reaction_repository::ReactionRepository;
pub use social_graph_repository::SocialGraphRepository;
pub use user_repository::UserRepository;

#[cfg(feature = "testing")]
pub use social_graph_repository::MockSocialGraphRepository;
