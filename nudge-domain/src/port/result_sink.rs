use crate::{
    error::DomainResult as Result, event::QueuedEvent, step::StepRecord, subscriber::Subscriber,
};
use async_trait::async_trait;

/// 执行结果记录方：每个 (处理器, 事件, 订阅者) 组合恰好记录一次
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn record(
        &self,
        event: &QueuedEvent,
        handler_name: &str,
        subscriber: &Subscriber,
        steps: &[StepRecord],
    ) -> Result<()>;
}
