//! 处理器执行器（HandlerExecutor）
//!
//! 针对 `(处理器, 事件, 订阅者)` 三元组运行步骤流水线：
//! - 任务：`should_activate → do_action`；
//! - 决策规则：`should_activate → select_action → do_action`；
//! - 任一步骤状态不为 `success` 即短路，后续步骤不再执行；
//! - 步骤返回错误、发生 panic 或返回非法状态时，转换为 `error` 记录而非中断流水线；
//! - 流水线结束后无论何种路径，都将完整步骤记录交给 `ResultSink` 恰好一次。
//!
use super::handler::{Handler, HandlerCatalog};
use crate::{
    error::{DomainError, DomainResult as Result},
    event::QueuedEvent,
    port::ResultSink,
    step::{StepKind, StepRecord, StepResult},
    subscriber::Subscriber,
};
use chrono::Utc;
use futures_util::FutureExt;
use std::{any::Any, future::Future, panic::AssertUnwindSafe, sync::Arc};

pub struct HandlerExecutor {
    catalog: Arc<HandlerCatalog>,
    sink: Arc<dyn ResultSink>,
}

impl HandlerExecutor {
    pub fn new(catalog: Arc<HandlerCatalog>, sink: Arc<dyn ResultSink>) -> Self {
        Self { catalog, sink }
    }

    pub fn catalog(&self) -> &Arc<HandlerCatalog> {
        &self.catalog
    }

    /// 执行指定名称的处理器；名称不在目录中时返回 `NotFound`，此时不产生记录
    pub async fn execute(
        &self,
        handler_name: &str,
        event: &QueuedEvent,
        subscriber: &Subscriber,
    ) -> Result<Vec<StepRecord>> {
        let Some(handler) = self.catalog.get(handler_name) else {
            return Err(DomainError::not_found(format!(
                "handler `{handler_name}` is neither a task nor a decision rule"
            )));
        };

        let steps = run_pipeline(&handler, event, subscriber).await;

        if let Err(err) = self
            .sink
            .record(event, handler_name, subscriber, &steps)
            .await
        {
            tracing::error!(
                handler = handler_name,
                subscriber = subscriber.id(),
                event_id = ?event.id(),
                error = %err,
                "failed to record handler result"
            );
        }

        Ok(steps)
    }
}

async fn run_pipeline(
    handler: &Handler,
    event: &QueuedEvent,
    subscriber: &Subscriber,
) -> Vec<StepRecord> {
    let mut trail = StepTrail::default();

    match handler {
        Handler::Task(task) => {
            if let Some(activation) = trail
                .step(StepKind::ShouldActivate, task.should_activate(subscriber, event))
                .await
            {
                trail
                    .step(StepKind::DoAction, task.do_action(subscriber, event, &activation))
                    .await;
            }
        }
        Handler::DecisionRule(rule) => {
            let Some(activation) = trail
                .step(StepKind::ShouldActivate, rule.should_activate(subscriber, event))
                .await
            else {
                return trail.records;
            };
            let Some(selection) = trail
                .step(
                    StepKind::SelectAction,
                    rule.select_action(subscriber, event, &activation),
                )
                .await
            else {
                return trail.records;
            };
            trail
                .step(StepKind::DoAction, rule.do_action(subscriber, event, &selection))
                .await;
        }
    }

    trail.records
}

#[derive(Default)]
struct StepTrail {
    records: Vec<StepRecord>,
}

impl StepTrail {
    /// 运行并记录一个步骤；仅在状态为 `success` 时返回结果供下一步使用
    async fn step<F>(&mut self, kind: StepKind, step: F) -> Option<StepResult>
    where
        F: Future<Output = anyhow::Result<StepResult>>,
    {
        let record = guard_step(kind, step).await;
        let next = record.result.is_success().then(|| record.result.clone());
        self.records.push(record);
        next
    }
}

async fn guard_step<F>(kind: StepKind, step: F) -> StepRecord
where
    F: Future<Output = anyhow::Result<StepResult>>,
{
    let timestamp = Utc::now();

    let result = match catch_panic(step).await {
        Ok(result) if result.status.is_valid() => result,
        Ok(result) => {
            let err = DomainError::StepExecution {
                step: kind.to_string(),
                reason: format!(
                    "invalid step status `{}`, expected one of success, stop, error",
                    result.status
                ),
            };
            tracing::warn!(step = %kind, error = %err, "step returned an invalid status");
            StepResult {
                result: result.result,
                ..StepResult::error(err.to_string())
            }
        }
        Err(reason) => {
            let err = DomainError::StepExecution {
                step: kind.to_string(),
                reason: format!("{reason:#}"),
            };
            tracing::warn!(step = %kind, error = %err, "step failed");
            StepResult::error(err.to_string())
        }
    };

    StepRecord {
        step: kind,
        result,
        timestamp,
    }
}

/// 将 panic 转换为普通错误
pub(crate) async fn catch_panic<T, F>(fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic payload"
    }
}
