//! 运行时装配（InterventionRuntime）
//!
//! 组合根：持有注册表、处理器目录、事件队列引擎、内存适配器与定时器集合的唯一实例，
//! 对外提供注册、发布、启停与定时器管理等应用层操作。
//!
use crate::{
    error::AppError, notifier::InMemoryChangeNotifier, result_sink::InMemoryResultSink,
    store::InMemoryEventStore, subscribers::InMemorySubscriberDirectory,
};
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use nudge_domain::{
    event::{EventDetails, QueuedEvent},
    eventing::{
        DrainOutcome, EngineState, EventQueueConfig, EventQueueEngine,
        IntervalTimerEventGenerator, IntervalTimerOptions,
    },
    intervention::{DecisionRule, HandlerCatalog, HandlerRegistry, Task},
    port::{EventPublisher, EventStore},
    subscriber::Subscriber,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 运行时配置
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub queue: EventQueueConfig,
}

impl RuntimeConfig {
    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        Ok(serde_json::from_str(raw)?)
    }
}

pub struct InterventionRuntime {
    engine: Arc<EventQueueEngine>,
    registry: Arc<HandlerRegistry>,
    catalog: Arc<HandlerCatalog>,
    store: Arc<InMemoryEventStore>,
    subscribers: Arc<InMemorySubscriberDirectory>,
    results: Arc<InMemoryResultSink>,
    timers: DashMap<String, Arc<IntervalTimerEventGenerator>>,
}

impl Default for InterventionRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl InterventionRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let notifier = Arc::new(InMemoryChangeNotifier::new());
        let store = Arc::new(InMemoryEventStore::with_notifier(notifier.clone()));
        let subscribers = Arc::new(InMemorySubscriberDirectory::new());
        let results = Arc::new(InMemoryResultSink::new());
        let registry = Arc::new(HandlerRegistry::new());
        let catalog = Arc::new(HandlerCatalog::new());

        let engine = Arc::new(
            EventQueueEngine::builder()
                .store(store.clone())
                .notifier(notifier)
                .subscribers(subscribers.clone())
                .registry(registry.clone())
                .handlers(catalog.clone(), results.clone())
                .config(config.queue)
                .build(),
        );

        Self {
            engine,
            registry,
            catalog,
            store,
            subscribers,
            results,
            timers: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &Arc<EventQueueEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<HandlerCatalog> {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<InMemoryEventStore> {
        &self.store
    }

    pub fn subscribers(&self) -> &Arc<InMemorySubscriberDirectory> {
        &self.subscribers
    }

    pub fn results(&self) -> &Arc<InMemoryResultSink> {
        &self.results
    }

    // --- 处理器 ---

    pub fn register_task(&self, name: &str, task: Arc<dyn Task>) -> Result<(), AppError> {
        Ok(self.catalog.register_task(name, task, false)?)
    }

    pub fn register_rule(&self, name: &str, rule: Arc<dyn DecisionRule>) -> Result<(), AppError> {
        Ok(self.catalog.register_rule(name, rule, false)?)
    }

    pub fn register_handlers<I>(
        &self,
        event_type: &str,
        handler_names: I,
        overwrite: bool,
    ) -> Result<(), AppError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Ok(self
            .registry
            .register(event_type, handler_names, overwrite)?)
    }

    pub fn unregister_handlers(&self, event_type: &str) -> bool {
        self.registry.unregister(event_type)
    }

    // --- 订阅者 ---

    pub fn add_subscriber(&self, subscriber: Subscriber) {
        self.subscribers.upsert(subscriber);
    }

    pub fn remove_subscriber(&self, id: &str) -> bool {
        self.subscribers.remove(id)
    }

    // --- 事件 ---

    /// 以当前时间发布事件
    pub async fn publish(
        &self,
        event_type: &str,
        event_details: Option<EventDetails>,
    ) -> Result<Option<QueuedEvent>, AppError> {
        self.publish_at(event_type, Utc::now(), event_details).await
    }

    pub async fn publish_at(
        &self,
        event_type: &str,
        generated_timestamp: DateTime<Utc>,
        event_details: Option<EventDetails>,
    ) -> Result<Option<QueuedEvent>, AppError> {
        Ok(self
            .engine
            .publish(event_type, generated_timestamp, event_details)
            .await?)
    }

    pub async fn drain(&self) -> DrainOutcome {
        self.engine.drain().await
    }

    pub async fn queued_events(&self) -> Result<Vec<QueuedEvent>, AppError> {
        Ok(self.engine.queued_events().await?)
    }

    pub async fn archived_events(&self) -> Result<Vec<QueuedEvent>, AppError> {
        Ok(self.engine.archived_events().await?)
    }

    pub async fn clear_queue(&self) -> Result<(), AppError> {
        let collection = &self.engine.config().queue_collection;
        self.store.clear(collection).await?;
        tracing::info!(%collection, "event queue cleared");
        Ok(())
    }

    pub async fn clear_archive(&self) -> Result<(), AppError> {
        let collection = &self.engine.config().archive_collection;
        self.store.clear(collection).await?;
        tracing::info!(%collection, "event archive cleared");
        Ok(())
    }

    // --- 引擎启停 ---

    pub async fn start(&self) -> Result<(), AppError> {
        Ok(self.engine.start().await?)
    }

    pub async fn stop(&self) -> Result<(), AppError> {
        Ok(self.engine.stop().await?)
    }

    pub async fn state(&self) -> EngineState {
        self.engine.state().await
    }

    /// 停止全部定时器与引擎
    pub async fn shutdown(&self) -> Result<(), AppError> {
        self.stop_all_timers();
        self.stop().await
    }

    // --- 定时器 ---

    /// 创建并启动命名定时器
    pub fn add_timer(
        &self,
        name: &str,
        interval_ms: u64,
        event_type: &str,
        options: IntervalTimerOptions,
    ) -> Result<(), AppError> {
        if name.trim().is_empty() {
            return Err(AppError::Validation(
                "timer name must be a non-empty string".into(),
            ));
        }

        match self.timers.entry(name.to_string()) {
            Entry::Occupied(_) => Err(AppError::TimerAlreadyExists(name.to_string())),
            Entry::Vacant(vacant) => {
                let publisher: Arc<dyn EventPublisher> = self.engine.clone();
                let timer = Arc::new(IntervalTimerEventGenerator::new(
                    interval_ms,
                    event_type,
                    options,
                    publisher,
                )?);
                timer.start();
                vacant.insert(timer);
                tracing::info!(timer = name, event_type, interval_ms, "timer added");
                Ok(())
            }
        }
    }

    /// 停止并移除命名定时器
    pub fn remove_timer(&self, name: &str) -> Result<(), AppError> {
        let Some((_, timer)) = self.timers.remove(name) else {
            return Err(AppError::TimerNotFound(name.to_string()));
        };
        timer.stop();
        tracing::info!(timer = name, "timer removed");
        Ok(())
    }

    pub fn timer(&self, name: &str) -> Option<Arc<IntervalTimerEventGenerator>> {
        self.timers.get(name).map(|t| t.value().clone())
    }

    pub fn timer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.timers.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    pub fn stop_all_timers(&self) {
        for timer in self.timers.iter() {
            timer.value().stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_json_fills_defaults() {
        let config =
            RuntimeConfig::from_json(r#"{"queue": {"queueCollection": "ignored", "dispatch_concurrency": 4}}"#)
                .unwrap();
        assert_eq!(config.queue.dispatch_concurrency, 4);
        assert_eq!(config.queue.queue_collection, "event_queue");
        assert_eq!(config.queue.archive_collection, "event_archive");

        assert_eq!(RuntimeConfig::from_json("{}").unwrap(), RuntimeConfig::default());
        assert!(matches!(
            RuntimeConfig::from_json("{\"queue\": 3}"),
            Err(AppError::Config(_))
        ));
    }

    #[tokio::test]
    async fn timers_are_named_and_unique() {
        let runtime = InterventionRuntime::default();

        runtime
            .add_timer("hourly", 1_000, "tick", IntervalTimerOptions::default())
            .unwrap();
        assert!(matches!(
            runtime.add_timer("hourly", 1_000, "tick", IntervalTimerOptions::default()),
            Err(AppError::TimerAlreadyExists(_))
        ));
        assert!(matches!(
            runtime.add_timer("bad", 0, "tick", IntervalTimerOptions::default()),
            Err(AppError::Domain(_))
        ));
        assert_eq!(runtime.timer_names(), vec!["hourly"]);
        assert!(runtime.timer("hourly").unwrap().is_running());

        runtime.remove_timer("hourly").unwrap();
        assert!(matches!(
            runtime.remove_timer("hourly"),
            Err(AppError::TimerNotFound(_))
        ));
        assert!(runtime.timer_names().is_empty());
    }
}
