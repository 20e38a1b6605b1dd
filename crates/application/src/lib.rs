//! 应用层实现。
//!
//! 围绕领域模型的实时消息用例：连接与会话管理、授权闸门、私聊与群聊引擎、
//! 社区进度同步、消息路由，以及对外部适配器（认证服务、会话缓存、消息加密、
//! 存储健康）的抽象。

pub mod authorization;
pub mod broadcaster;
pub mod cache;
pub mod cipher;
pub mod clock;
pub mod connection;
pub mod core;
pub mod error;
pub mod health;
pub mod index;
pub mod locks;
pub mod memory;
pub mod protocol;
pub mod router;
pub mod services;
pub mod session;

pub use authorization::{AuthorizationGate, CandidateScreening};
pub use broadcaster::BroadcastFanout;
pub use cipher::{CipherError, MessageCipher, PlaintextCipher};
pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::{
    Binding, ConnectionCounts, ConnectionId, ConnectionInfo, ConnectionRegistry, OutboundFrame,
    CLOSE_AUTH_TIMEOUT, CLOSE_SESSION_CONFLICT,
};
pub use self::core::{MessagingCore, MessagingDependencies, MessagingSettings};
pub use error::{ApplicationError, ErrorCode};
pub use health::{PoolStats, StoreHealth};
pub use cache::EvictionQueue;
pub use index::{MessageIndex, MessageLocation, DEFAULT_INDEX_CAPACITY};
pub use locks::{KeyedGuard, KeyedLocks};
pub use memory::{MemoryStore, StaticTokenOracle};
pub use protocol::{ClientEnvelope, OutboundEnvelope, ServerEvent};
pub use router::MessageRouter;
pub use services::{
    Caller, ConversationService, GroupService, ProgressionService, ProgressionSyncRequest,
    ProgressionSyncResponse,
};
pub use session::{AuthFailure, AuthenticationOracle, CacheError, NoopSessionCache, SessionCache, SessionRegistry};
