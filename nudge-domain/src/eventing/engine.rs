//! 事件队列引擎（EventQueueEngine）
//!
//! 统一编排“发布 → 入队 → drain → 归档”：
//! - `publish`：仅当事件类型已注册处理器时入队；
//! - `drain`：逐个取出队列事件，依次运行生命周期钩子与各订阅者的处理器流水线，
//!   处理完成后归档；同一时刻至多一轮 drain；
//! - `listen` / `start` / `stop`：订阅队列插入通知，收到通知即异步触发 drain。
//!
//! 单元粒度的失败（步骤、钩子、归档）仅记录日志，不影响同批次其它工作。
//!
use crate::{
    error::{DomainError, DomainResult as Result},
    event::{EventDetails, QueuedEvent},
    intervention::{
        HandlerCatalog, HandlerExecutor, HandlerRegistry, executor::catch_panic,
    },
    port::{
        ChangeCallback, ChangeKind, ChangeNotifier, EventPublisher, EventStore, ResultSink,
        SubscriberSnapshot,
    },
    subscriber::Subscriber,
};
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::task::JoinHandle;

// 导入由 bon::Builder 生成的 typestate 模块与状态转换别名
use self::event_queue_engine_builder::{IsUnset, SetExecutor, State as BuilderState};

#[derive(Builder)]
pub struct EventQueueEngine {
    store: Arc<dyn EventStore>,
    notifier: Arc<dyn ChangeNotifier>,
    subscribers: Arc<dyn SubscriberSnapshot>,
    registry: Arc<HandlerRegistry>,
    #[builder(setters(vis = "pub(crate)"))]
    executor: HandlerExecutor,
    #[builder(default)]
    config: EventQueueConfig,
    /// 重入保护：至多一轮 drain
    #[builder(skip)]
    is_draining: AtomicBool,
    /// 开关：为 false 时不再响应插入通知，进行中的 drain 处理完当前批次后退出
    #[builder(skip = AtomicBool::new(true))]
    accepting_work: AtomicBool,
    /// drain 进行中时又有触发到来
    #[builder(skip)]
    rearm: AtomicBool,
}

impl<S: BuilderState> EventQueueEngineBuilder<S> {
    /// 由处理器目录与结果记录方组装执行器
    pub fn handlers(
        self,
        catalog: Arc<HandlerCatalog>,
        sink: Arc<dyn ResultSink>,
    ) -> EventQueueEngineBuilder<SetExecutor<S>>
    where
        <S as BuilderState>::Executor: IsUnset,
    {
        self.executor(HandlerExecutor::new(catalog, sink))
    }
}

impl EventQueueEngine {
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<HandlerCatalog> {
        self.executor.catalog()
    }

    pub fn config(&self) -> &EventQueueConfig {
        &self.config
    }

    pub fn is_draining(&self) -> bool {
        self.is_draining.load(Ordering::Acquire)
    }

    pub fn is_accepting_work(&self) -> bool {
        self.accepting_work.load(Ordering::Acquire)
    }

    pub async fn state(&self) -> EngineState {
        if self.is_draining() {
            EngineState::Draining
        } else if self.is_listening().await {
            EngineState::Listening
        } else {
            EngineState::Stopped
        }
    }

    pub async fn is_listening(&self) -> bool {
        self.notifier
            .has(&self.config.queue_collection, ChangeKind::Insert)
            .await
    }

    pub async fn queued_events(&self) -> Result<Vec<QueuedEvent>> {
        self.store.find_all(&self.config.queue_collection).await
    }

    pub async fn archived_events(&self) -> Result<Vec<QueuedEvent>> {
        self.store.find_all(&self.config.archive_collection).await
    }

    /// 发布事件：事件类型未注册处理器时跳过并返回 `None`；存储失败原样返回
    pub async fn publish(
        &self,
        event_type: &str,
        generated_timestamp: DateTime<Utc>,
        event_details: Option<EventDetails>,
    ) -> Result<Option<QueuedEvent>> {
        if !self.registry.has(event_type) {
            tracing::info!(event_type, "no handlers registered, event not queued");
            return Ok(None);
        }

        let event = QueuedEvent::new(event_type, generated_timestamp, event_details);
        match self.store.insert(&self.config.queue_collection, event).await {
            Ok(stored) => {
                tracing::debug!(event_type, event_id = ?stored.id(), "event queued");
                Ok(Some(stored))
            }
            Err(err) => {
                tracing::error!(event_type, error = %err, "failed to queue event");
                Err(err)
            }
        }
    }

    /// 处理队列直到为空（或停止接收工作）
    ///
    /// 已有 drain 进行中时立即返回 `DrainOutcome::Skipped`，并请求进行中的 drain
    /// 在释放保护后再检查一次队列，避免错过其最后一次取队列之后插入的事件。
    /// 归档失败的事件留在队列中，本轮不再重复处理，由下一轮 drain 重试。
    pub async fn drain(&self) -> DrainOutcome {
        // 先置位再抢占：进行中的 drain 释放保护后一定能看到该请求
        self.rearm.store(true, Ordering::Release);
        let Some(mut guard) = DrainGuard::acquire(&self.is_draining) else {
            tracing::debug!("drain already in progress, skipping");
            return DrainOutcome::Skipped;
        };

        let mut stats = DrainStats::default();
        loop {
            self.rearm.store(false, Ordering::Release);
            self.drain_cycle(&mut stats).await;
            drop(guard);

            if !(self.rearm.load(Ordering::Acquire) && self.is_accepting_work()) {
                break;
            }
            match DrainGuard::acquire(&self.is_draining) {
                Some(next) => guard = next,
                None => break,
            }
        }

        DrainOutcome::Completed(stats)
    }

    async fn drain_cycle(&self, stats: &mut DrainStats) {
        let mut attempted: HashSet<String> = HashSet::new();
        let mut first_pass = true;

        loop {
            let subscribers = self.subscribers.all_subscribers();
            let queued = match self.queued_events().await {
                Ok(events) => events,
                Err(err) => {
                    tracing::error!(error = %err, "failed to fetch queued events");
                    break;
                }
            };

            let batch: Vec<QueuedEvent> = queued
                .into_iter()
                .filter(|event| match event.id() {
                    Some(id) => !attempted.contains(id),
                    None => first_pass,
                })
                .collect();
            first_pass = false;

            if batch.is_empty() {
                break;
            }

            stats.passes += 1;
            tracing::debug!(
                events = batch.len(),
                subscribers = subscribers.len(),
                "draining event queue"
            );

            for event in &batch {
                if let Some(id) = event.id() {
                    attempted.insert(id.to_string());
                }

                self.process_event(event, &subscribers).await;
                stats.processed += 1;

                match self.archive(event).await {
                    Ok(()) => stats.archived += 1,
                    Err(err) => {
                        stats.archive_failures += 1;
                        tracing::warn!(
                            event_type = event.event_type(),
                            event_id = ?event.id(),
                            error = %err,
                            "archival failed, event stays queued"
                        );
                    }
                }
            }

            if !self.is_accepting_work() {
                tracing::info!("engine stopped, leaving drain after current batch");
                break;
            }
        }
    }

    /// 将事件原样复制到归档集合，再按 id 从队列移除；无 id 的事件不可归档
    pub async fn archive(&self, event: &QueuedEvent) -> Result<()> {
        let Some(id) = event.id() else {
            tracing::error!(event_type = event.event_type(), "cannot archive event without id");
            return Err(DomainError::validation("cannot archive an event without id"));
        };

        self.store
            .insert(&self.config.archive_collection, event.clone())
            .await
            .inspect_err(|err| {
                tracing::error!(event_id = id, error = %err, "failed to copy event to archive");
            })?;

        let removed = self
            .store
            .remove_by_id(&self.config.queue_collection, id)
            .await
            .inspect_err(|err| {
                tracing::error!(event_id = id, error = %err, "failed to remove archived event from queue");
            })?;
        if !removed {
            tracing::warn!(event_id = id, "archived event was no longer queued");
        }

        Ok(())
    }

    /// 订阅队列插入通知并立即触发一轮 drain；已订阅时为空操作
    pub async fn listen(self: &Arc<Self>) -> Result<()> {
        if self.is_listening().await {
            tracing::debug!("queue listener already armed");
            return Ok(());
        }

        let engine = Arc::downgrade(self);
        let callback: ChangeCallback = Arc::new(move |event: QueuedEvent| {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            if !engine.is_accepting_work() {
                tracing::debug!(event_id = ?event.id(), "insert observed while stopped, ignoring");
                return;
            }
            engine.spawn_drain();
        });

        self.notifier
            .subscribe(&self.config.queue_collection, ChangeKind::Insert, callback)
            .await?;
        tracing::info!(collection = %self.config.queue_collection, "queue listener armed");

        self.spawn_drain();
        Ok(())
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.accepting_work.store(true, Ordering::Release);
        self.listen().await
    }

    /// 取消订阅并停止接收工作；不打断进行中的 drain
    pub async fn stop(&self) -> Result<()> {
        self.accepting_work.store(false, Ordering::Release);
        self.notifier
            .unsubscribe(&self.config.queue_collection, ChangeKind::Insert)
            .await?;
        tracing::info!(collection = %self.config.queue_collection, "queue listener removed");
        Ok(())
    }

    /// 在后台触发一轮 drain，不等待其完成
    pub fn spawn_drain(self: &Arc<Self>) -> Option<JoinHandle<DrainOutcome>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime available, drain not triggered");
            return None;
        };
        let engine = self.clone();
        Some(runtime.spawn(async move { engine.drain().await }))
    }

    async fn process_event(&self, event: &QueuedEvent, subscribers: &[Subscriber]) {
        let handler_names = self.registry.handlers_for(event.event_type());

        self.run_lifecycle(LifecycleHook::BeforeExecution, event, &handler_names)
            .await;

        // 订阅者在外层、处理器在内层，均保持快照与注册顺序
        let handler_count = handler_names.len();
        let units = (0..subscribers.len())
            .flat_map(move |s| (0..handler_count).map(move |h| (s, h)));
        let concurrency = self.config.dispatch_concurrency.max(1);
        let names = handler_names.as_slice();

        stream::iter(units)
            .for_each_concurrent(Some(concurrency), move |(s, h)| async move {
                let subscriber = &subscribers[s];
                let handler_name = names[h].as_str();
                match self.executor.execute(handler_name, event, subscriber).await {
                    Ok(steps) => {
                        tracing::debug!(
                            handler = %handler_name,
                            subscriber = subscriber.id(),
                            event_id = ?event.id(),
                            steps = steps.len(),
                            "handler executed"
                        );
                    }
                    Err(DomainError::NotFound { reason }) => {
                        tracing::warn!(handler = %handler_name, %reason, "handler skipped");
                    }
                    Err(err) => {
                        tracing::error!(
                            handler = %handler_name,
                            subscriber = subscriber.id(),
                            event_id = ?event.id(),
                            error = %err,
                            "handler execution failed"
                        );
                    }
                }
            })
            .await;

        self.run_lifecycle(LifecycleHook::AfterExecution, event, &handler_names)
            .await;
    }

    async fn run_lifecycle(&self, hook: LifecycleHook, event: &QueuedEvent, handler_names: &[String]) {
        for name in handler_names {
            let Some(handler) = self.catalog().get(name) else {
                tracing::warn!(handler = %name, %hook, "lifecycle hook skipped, handler not found");
                continue;
            };

            let outcome = match hook {
                LifecycleHook::BeforeExecution => catch_panic(handler.before_execution(event)).await,
                LifecycleHook::AfterExecution => catch_panic(handler.after_execution(event)).await,
            };
            if let Err(err) = outcome {
                tracing::warn!(
                    handler = %name,
                    %hook,
                    event_id = ?event.id(),
                    error = %format!("{err:#}"),
                    "lifecycle hook failed"
                );
            }
        }
    }
}

#[async_trait]
impl EventPublisher for EventQueueEngine {
    async fn publish(
        &self,
        event_type: &str,
        generated_timestamp: DateTime<Utc>,
        event_details: Option<EventDetails>,
    ) -> Result<Option<QueuedEvent>> {
        EventQueueEngine::publish(self, event_type, generated_timestamp, event_details).await
    }
}

/// drain 期间持有，释放时清除重入标记（含提前返回与 panic 路径）
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleHook {
    BeforeExecution,
    AfterExecution,
}

impl fmt::Display for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleHook::BeforeExecution => f.write_str("beforeExecution"),
            LifecycleHook::AfterExecution => f.write_str("afterExecution"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Listening,
    Draining,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// 取到非空批次的次数
    pub passes: usize,
    pub processed: usize,
    pub archived: usize,
    pub archive_failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// 已有 drain 进行中
    Skipped,
    Completed(DrainStats),
}

impl DrainOutcome {
    pub fn stats(&self) -> Option<&DrainStats> {
        match self {
            DrainOutcome::Skipped => None,
            DrainOutcome::Completed(stats) => Some(stats),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, DrainOutcome::Skipped)
    }
}

/// 事件队列配置
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventQueueConfig {
    /// 队列集合名
    pub queue_collection: String,
    /// 归档集合名
    pub archive_collection: String,
    /// 单个事件内 (订阅者, 处理器) 组合的并发度；1 表示严格按快照与注册顺序执行
    pub dispatch_concurrency: usize,
}

impl Default for EventQueueConfig {
    fn default() -> Self {
        Self {
            queue_collection: "event_queue".to_string(),
            archive_collection: "event_archive".to_string(),
            dispatch_concurrency: 1,
        }
    }
}
