//! 组装：把存储、认证服务、缓存与加密接缝装配成完整的消息核心

use std::sync::Arc;
use std::time::Duration;

use domain::{
    CommunityRepository, ConversationRepository, GroupMemberRepository, GroupMessageRepository,
    GroupRepository, PrivateMessageRepository, ReactionRepository, SocialGraphRepository,
    UserRepository,
};
use tokio::task::JoinHandle;

use crate::{
    authorization::AuthorizationGate,
    broadcaster::BroadcastFanout,
    cipher::{MessageCipher, PlaintextCipher},
    clock::{Clock, SystemClock},
    connection::ConnectionRegistry,
    health::StoreHealth,
    index::MessageIndex,
    router::MessageRouter,
    services::{
        ConversationService, ConversationServiceDependencies, GroupService,
        GroupServiceDependencies, ProgressionService, ProgressionServiceDependencies,
    },
    session::{AuthenticationOracle, NoopSessionCache, SessionCache, SessionRegistry},
};

pub struct MessagingDependencies {
    pub social_graph: Arc<dyn SocialGraphRepository>,
    pub users: Arc<dyn UserRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub private_messages: Arc<dyn PrivateMessageRepository>,
    pub groups: Arc<dyn GroupRepository>,
    pub group_members: Arc<dyn GroupMemberRepository>,
    pub group_messages: Arc<dyn GroupMessageRepository>,
    pub reactions: Arc<dyn ReactionRepository>,
    pub communities: Arc<dyn CommunityRepository>,
    pub store_health: Arc<dyn StoreHealth>,
    pub oracle: Arc<dyn AuthenticationOracle>,
    pub session_cache: Arc<dyn SessionCache>,
    pub cipher: Arc<dyn MessageCipher>,
    pub clock: Arc<dyn Clock>,
}

impl MessagingDependencies {
    /// 所有存储接口由同一个实现提供（内存存储）
    pub fn from_store<S>(store: Arc<S>, oracle: Arc<dyn AuthenticationOracle>) -> Self
    where
        S: SocialGraphRepository
            + UserRepository
            + ConversationRepository
            + PrivateMessageRepository
            + GroupRepository
            + GroupMemberRepository
            + GroupMessageRepository
            + ReactionRepository
            + CommunityRepository
            + StoreHealth
            + 'static,
    {
        Self {
            social_graph: store.clone(),
            users: store.clone(),
            conversations: store.clone(),
            private_messages: store.clone(),
            groups: store.clone(),
            group_members: store.clone(),
            group_messages: store.clone(),
            reactions: store.clone(),
            communities: store.clone(),
            store_health: store,
            oracle,
            session_cache: Arc::new(NoopSessionCache),
            cipher: Arc::new(PlaintextCipher),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn MessageCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_session_cache(mut self, cache: Arc<dyn SessionCache>) -> Self {
        self.session_cache = cache;
        self
    }
}

#[derive(Debug, Clone)]
pub struct MessagingSettings {
    pub session_ttl_seconds: u64,
    pub tail_capacity: usize,
    pub history_limit: usize,
    pub default_max_members: u32,
    pub grace_period: chrono::Duration,
    pub sweep_interval: Duration,
    /// 消息定位索引容量
    pub index_capacity: usize,
    /// 保留内存尾部的会话数上限
    pub max_cached_conversations: usize,
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            session_ttl_seconds: 3600,
            tail_capacity: 50,
            history_limit: 50,
            default_max_members: 50,
            grace_period: chrono::Duration::days(domain::DEFAULT_GRACE_PERIOD_DAYS),
            sweep_interval: Duration::from_secs(3600),
            index_capacity: crate::index::DEFAULT_INDEX_CAPACITY,
            max_cached_conversations: 10_000,
        }
    }
}

#[derive(Clone)]
pub struct MessagingCore {
    pub connections: Arc<ConnectionRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub conversations: Arc<ConversationService>,
    pub groups: Arc<GroupService>,
    pub progression: Arc<ProgressionService>,
    pub router: Arc<MessageRouter>,
    pub fanout: BroadcastFanout,
    pub store_health: Arc<dyn StoreHealth>,
    pub clock: Arc<dyn Clock>,
    pub settings: MessagingSettings,
}

impl MessagingCore {
    pub fn new(deps: MessagingDependencies, settings: MessagingSettings) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let fanout = BroadcastFanout::new(connections.clone(), deps.clock.clone());
        let gate = AuthorizationGate::new(deps.social_graph.clone());
        let index = Arc::new(MessageIndex::with_capacity(settings.index_capacity));

        let sessions = Arc::new(SessionRegistry::new(
            connections.clone(),
            deps.oracle.clone(),
            deps.session_cache.clone(),
            gate.clone(),
            fanout.clone(),
            settings.session_ttl_seconds,
        ));

        let conversations = Arc::new(ConversationService::new(ConversationServiceDependencies {
            gate: gate.clone(),
            conversation_repository: deps.conversations.clone(),
            message_repository: deps.private_messages.clone(),
            reaction_repository: deps.reactions.clone(),
            cipher: deps.cipher.clone(),
            clock: deps.clock.clone(),
            fanout: fanout.clone(),
            index: index.clone(),
            tail_capacity: settings.tail_capacity,
            history_limit: settings.history_limit,
            max_cached_conversations: settings.max_cached_conversations,
        }));

        let groups = Arc::new(GroupService::new(GroupServiceDependencies {
            gate,
            group_repository: deps.groups.clone(),
            member_repository: deps.group_members.clone(),
            message_repository: deps.group_messages.clone(),
            reaction_repository: deps.reactions.clone(),
            user_repository: deps.users.clone(),
            cipher: deps.cipher.clone(),
            clock: deps.clock.clone(),
            fanout: fanout.clone(),
            index: index.clone(),
            history_limit: settings.history_limit,
            default_max_members: settings.default_max_members,
            grace_period: settings.grace_period,
        }));

        let progression = Arc::new(ProgressionService::new(ProgressionServiceDependencies {
            community_repository: deps.communities.clone(),
            clock: deps.clock.clone(),
            fanout: fanout.clone(),
        }));

        let router = Arc::new(MessageRouter::new(
            sessions.clone(),
            conversations.clone(),
            groups.clone(),
            index,
            fanout.clone(),
        ));

        Self {
            connections,
            sessions,
            conversations,
            groups,
            progression,
            router,
            fanout,
            store_health: deps.store_health,
            clock: deps.clock,
            settings,
        }
    }

    /// 定期清理宽限期已过的软删除群组
    pub fn spawn_group_sweeper(&self) -> JoinHandle<()> {
        let groups = self.groups.clone();
        let period = self.settings.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // 第一次 tick 立即返回，跳过
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = groups.purge_expired_groups().await {
                    tracing::warn!(error = %err, "群组清理任务失败");
                }
            }
        })
    }
}
