use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nudge_domain::{
    error::DomainResult,
    event::QueuedEvent,
    port::ResultSink,
    step::{StepRecord, StepStatus},
    subscriber::Subscriber,
};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};

/// 一次处理器执行的审计结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerResult {
    pub event_id: Option<String>,
    pub event_type: String,
    pub handler_name: String,
    pub subscriber_id: String,
    pub steps: Vec<StepRecord>,
    pub recorded_at: DateTime<Utc>,
}

impl HandlerResult {
    /// 最后一步的状态；无步骤时为空
    pub fn final_status(&self) -> Option<&StepStatus> {
        self.steps.last().map(|s| &s.result.status)
    }
}

/// 基于内存的结果记录方
#[derive(Default)]
pub struct InMemoryResultSink {
    results: Mutex<Vec<HandlerResult>>,
}

impl InMemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<HandlerResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn results_for(&self, handler_name: &str) -> Vec<HandlerResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.handler_name == handler_name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ResultSink for InMemoryResultSink {
    async fn record(
        &self,
        event: &QueuedEvent,
        handler_name: &str,
        subscriber: &Subscriber,
        steps: &[StepRecord],
    ) -> DomainResult<()> {
        let result = HandlerResult {
            event_id: event.id().map(str::to_string),
            event_type: event.event_type().to_string(),
            handler_name: handler_name.to_string(),
            subscriber_id: subscriber.id().to_string(),
            steps: steps.to_vec(),
            recorded_at: Utc::now(),
        };
        tracing::debug!(
            handler = handler_name,
            subscriber = subscriber.id(),
            status = ?result.final_status(),
            "handler result recorded"
        );

        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result);
        Ok(())
    }
}
