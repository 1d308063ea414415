use crate::notifier::InMemoryChangeNotifier;
use async_trait::async_trait;
use dashmap::DashMap;
use nudge_domain::{
    error::DomainResult,
    event::QueuedEvent,
    port::{ChangeKind, EventStore},
};
use std::sync::Arc;
use uuid::Uuid;

/// 基于内存的事件存储
/// - 每个集合按插入顺序保存事件
/// - 插入时缺少 id 则生成 UUID，已有 id 原样保留（归档复制依赖于此）
/// - 若挂接了 `InMemoryChangeNotifier`，每次插入后发出 `Insert` 通知
#[derive(Default)]
pub struct InMemoryEventStore {
    collections: DashMap<String, Vec<QueuedEvent>>,
    notifier: Option<Arc<InMemoryChangeNotifier>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifier(notifier: Arc<InMemoryChangeNotifier>) -> Self {
        Self {
            collections: DashMap::new(),
            notifier: Some(notifier),
        }
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |c| c.len())
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert(&self, collection: &str, event: QueuedEvent) -> DomainResult<QueuedEvent> {
        let stored = match event.id() {
            Some(_) => event,
            None => event.with_id(Uuid::new_v4().to_string()),
        };

        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(stored.clone());

        if let Some(notifier) = &self.notifier {
            notifier.notify(collection, ChangeKind::Insert, &stored);
        }

        Ok(stored)
    }

    async fn find_all(&self, collection: &str) -> DomainResult<Vec<QueuedEvent>> {
        Ok(self
            .collections
            .get(collection)
            .map(|c| c.value().clone())
            .unwrap_or_default())
    }

    async fn remove_by_id(&self, collection: &str, id: &str) -> DomainResult<bool> {
        let Some(mut events) = self.collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = events.len();
        events.retain(|e| e.id() != Some(id));
        Ok(events.len() != before)
    }

    async fn clear(&self, collection: &str) -> DomainResult<()> {
        self.collections.remove(collection);
        Ok(())
    }
}
