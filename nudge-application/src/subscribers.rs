use nudge_domain::{port::SubscriberSnapshot, subscriber::Subscriber};
use std::sync::{PoisonError, RwLock};

/// 基于内存的订阅者目录，快照按加入顺序返回
#[derive(Default)]
pub struct InMemorySubscriberDirectory {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl InMemorySubscriberDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入订阅者；同 id 已存在时原位替换
    pub fn upsert(&self, subscriber: Subscriber) {
        let mut guard = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.iter_mut().find(|s| s.id() == subscriber.id()) {
            Some(existing) => *existing = subscriber,
            None => guard.push(subscriber),
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut guard = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        guard.retain(|s| s.id() != id);
        guard.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SubscriberSnapshot for InMemorySubscriberDirectory {
    fn all_subscribers(&self) -> Vec<Subscriber> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
