use crate::{
    error::DomainResult as Result,
    event::{EventDetails, QueuedEvent},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 事件发布入口
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// 发布事件；事件类型未注册处理器时跳过并返回 `None`
    async fn publish(
        &self,
        event_type: &str,
        generated_timestamp: DateTime<Utc>,
        event_details: Option<EventDetails>,
    ) -> Result<Option<QueuedEvent>>;
}
