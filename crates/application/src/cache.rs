//! 有界缓存的淘汰顺序
//!
//! 只记录键的插入顺序；调用方在键首次进入自己的表时调用 `admit`，
//! 超出容量的最旧键被返回，由调用方从表中删除。

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

#[derive(Debug)]
pub struct EvictionQueue<K> {
    order: Mutex<VecDeque<K>>,
    capacity: usize,
}

impl<K> EvictionQueue<K>
where
    K: PartialEq,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            order: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// 记录新键，返回因超出容量被淘汰的键
    pub fn admit(&self, key: K) -> Vec<K> {
        let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        order.push_back(key);
        let overflow = order.len().saturating_sub(self.capacity);
        order.drain(..overflow).collect()
    }

    /// 调用方主动删除的键不再参与淘汰
    pub fn forget<F>(&self, mut removed: F)
    where
        F: FnMut(&K) -> bool,
    {
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key| !removed(key));
    }

    pub fn len(&self) -> usize {
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_keys_are_evicted_first() {
        let queue = EvictionQueue::new(2);
        assert!(queue.admit(1).is_empty());
        assert!(queue.admit(2).is_empty());
        assert_eq!(queue.admit(3), vec![1]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn forgotten_keys_free_their_slot() {
        let queue = EvictionQueue::new(2);
        queue.admit("a");
        queue.admit("b");
        queue.forget(|key| *key == "a");
        assert!(queue.admit("c").is_empty());
        assert_eq!(queue.admit("d"), vec!["b"]);
    }
}
