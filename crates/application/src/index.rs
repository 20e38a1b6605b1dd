//! 消息定位索引：`messageId -> 会话 | 群组`
//!
//! 调用方可以省略容器ID，处理器先查这里，未命中再按主键查存储并回填。
//! 索引有容量上限，超出时淘汰最早写入的条目。

use dashmap::DashMap;
use domain::ConversationId;
use uuid::Uuid;

use crate::cache::EvictionQueue;

/// 默认最多索引的消息数
pub const DEFAULT_INDEX_CAPACITY: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageLocation {
    Conversation(ConversationId),
    Group(Uuid),
}

#[derive(Debug)]
pub struct MessageIndex {
    entries: DashMap<Uuid, MessageLocation>,
    eviction: EvictionQueue<Uuid>,
}

impl Default for MessageIndex {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_INDEX_CAPACITY)
    }
}

impl MessageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            eviction: EvictionQueue::new(capacity),
        }
    }

    pub fn record(&self, message_id: Uuid, location: MessageLocation) {
        if self.entries.insert(message_id, location).is_some() {
            return;
        }
        for evicted in self.eviction.admit(message_id) {
            self.entries.remove(&evicted);
        }
    }

    pub fn locate(&self, message_id: Uuid) -> Option<MessageLocation> {
        self.entries.get(&message_id).map(|entry| entry.value().clone())
    }

    pub fn evict_conversation(&self, conversation_id: &ConversationId) {
        self.evict_where(|location| {
            matches!(location, MessageLocation::Conversation(id) if id == conversation_id)
        });
    }

    pub fn evict_group(&self, group_id: Uuid) {
        self.evict_where(|location| matches!(location, MessageLocation::Group(id) if *id == group_id));
    }

    fn evict_where<F>(&self, matches: F)
    where
        F: Fn(&MessageLocation) -> bool,
    {
        let mut removed = std::collections::HashSet::new();
        self.entries.retain(|message_id, location| {
            let hit = matches(location);
            if hit {
                removed.insert(*message_id);
            }
            !hit
        });
        if !removed.is_empty() {
            self.eviction.forget(|message_id| removed.contains(message_id));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_is_scoped_to_container() {
        let index = MessageIndex::new();
        let conversation = ConversationId::between(Uuid::new_v4(), Uuid::new_v4());
        let group = Uuid::new_v4();
        let (m1, m2) = (Uuid::new_v4(), Uuid::new_v4());

        index.record(m1, MessageLocation::Conversation(conversation.clone()));
        index.record(m2, MessageLocation::Group(group));

        index.evict_group(group);
        assert_eq!(index.locate(m2), None);
        assert_eq!(
            index.locate(m1),
            Some(MessageLocation::Conversation(conversation.clone()))
        );

        index.evict_conversation(&conversation);
        assert!(index.is_empty());
    }

    #[test]
    fn oldest_entries_fall_out_beyond_capacity() {
        let index = MessageIndex::with_capacity(2);
        let group = Uuid::new_v4();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            index.record(*id, MessageLocation::Group(group));
        }
        // 重复写入不占用额外容量
        index.record(ids[2], MessageLocation::Group(group));

        assert_eq!(index.len(), 2);
        assert_eq!(index.locate(ids[0]), None);
        assert_eq!(index.locate(ids[1]), Some(MessageLocation::Group(group)));
        assert_eq!(index.locate(ids[2]), Some(MessageLocation::Group(group)));
    }
}
