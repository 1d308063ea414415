use async_trait::async_trait;
use dashmap::DashMap;
use nudge_domain::{
    error::DomainResult,
    event::QueuedEvent,
    port::{ChangeCallback, ChangeKind, ChangeNotifier},
};

/// 基于内存的变更通知实现
/// - 每个 (集合, 变更类型) 至多一个回调，重复订阅覆盖旧回调
/// - 由 `InMemoryEventStore` 在写入后调用 `notify`
#[derive(Default)]
pub struct InMemoryChangeNotifier {
    callbacks: DashMap<(String, ChangeKind), ChangeCallback>,
}

impl InMemoryChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 通知订阅方；回调在调用方上下文中同步执行
    pub fn notify(&self, collection: &str, kind: ChangeKind, item: &QueuedEvent) {
        // 回调执行期间不持有分片锁
        let callback = self
            .callbacks
            .get(&(collection.to_string(), kind))
            .map(|cb| cb.value().clone());

        if let Some(callback) = callback {
            callback(item.clone());
        }
    }
}

#[async_trait]
impl ChangeNotifier for InMemoryChangeNotifier {
    async fn subscribe(
        &self,
        collection: &str,
        kind: ChangeKind,
        callback: ChangeCallback,
    ) -> DomainResult<()> {
        self.callbacks.insert((collection.to_string(), kind), callback);
        tracing::debug!(collection, ?kind, "change listener subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, collection: &str, kind: ChangeKind) -> DomainResult<()> {
        if self
            .callbacks
            .remove(&(collection.to_string(), kind))
            .is_none()
        {
            tracing::debug!(collection, ?kind, "no change listener to unsubscribe");
        }
        Ok(())
    }

    async fn has(&self, collection: &str, kind: ChangeKind) -> bool {
        self.callbacks.contains_key(&(collection.to_string(), kind))
    }
}
