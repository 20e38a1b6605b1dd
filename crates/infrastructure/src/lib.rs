//! 基础设施层实现。
//!
//! 提供 PostgreSQL 仓储、Redis 会话镜像与 AES-GCM 消息加密等适配器，
//! 实现应用/领域层定义的接口。

pub mod builder;
pub mod cipher;
pub mod migrations;
pub mod repository;
pub mod session_cache;

pub use builder::{Infrastructure, InfrastructureConfig, InfrastructureError};
pub use cipher::{CipherKeyError, RingMessageCipher};
pub use migrations::MIGRATOR;
pub use repository::{
    create_pg_pool, PgCommunityRepository, PgConversationRepository, PgGroupMemberRepository,
    PgGroupMessageRepository, PgGroupRepository, PgPrivateMessageRepository,
    PgReactionRepository, PgSocialGraphRepository, PgStorage, PgUserRepository,
};
pub use session_cache::RedisSessionCache;
