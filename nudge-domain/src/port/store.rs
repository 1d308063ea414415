//! 事件存储（EventStore）协议
//!
//! 队列与归档均为同一存储中的命名集合；每次调用视为一次独立的原子请求，
//! 引擎不会跨调用持有锁。
//!
use crate::{error::DomainResult as Result, event::QueuedEvent};
use async_trait::async_trait;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// 插入事件并返回带 id 的持久化副本（已有 id 时原样保留）
    async fn insert(&self, collection: &str, event: QueuedEvent) -> Result<QueuedEvent>;

    /// 按存储顺序返回集合内全部事件
    async fn find_all(&self, collection: &str) -> Result<Vec<QueuedEvent>>;

    /// 按 id 删除，返回是否确有删除
    async fn remove_by_id(&self, collection: &str, id: &str) -> Result<bool>;

    async fn clear(&self, collection: &str) -> Result<()>;
}
