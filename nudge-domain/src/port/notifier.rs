//! 变更通知（ChangeNotifier）协议
//!
//! 允许订阅“某集合发生某类变更”，回调收到被插入的事件。
//! 回调在通知方的上下文中同步调用，实现方不应在回调内阻塞。
//!
use crate::{error::DomainResult as Result, event::QueuedEvent};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Remove,
}

pub type ChangeCallback = Arc<dyn Fn(QueuedEvent) + Send + Sync>;

#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn subscribe(
        &self,
        collection: &str,
        kind: ChangeKind,
        callback: ChangeCallback,
    ) -> Result<()>;

    async fn unsubscribe(&self, collection: &str, kind: ChangeKind) -> Result<()>;

    async fn has(&self, collection: &str, kind: ChangeKind) -> bool;
}
