use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::Utc;
use nudge_domain::error::{DomainError, DomainResult};
use nudge_domain::event::{EventDetails, QueuedEvent};
use nudge_domain::eventing::{EngineState, EventQueueConfig, EventQueueEngine};
use nudge_domain::intervention::{HandlerCatalog, HandlerRegistry, Task};
use nudge_domain::port::{
    ChangeCallback, ChangeKind, ChangeNotifier, EventStore, ResultSink, SubscriberSnapshot,
};
use nudge_domain::step::{StepRecord, StepResult};
use nudge_domain::subscriber::Subscriber;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

const QUEUE: &str = "event_queue";
const ARCHIVE: &str = "event_archive";

#[derive(Default)]
struct Notifier {
    callbacks: Mutex<HashMap<(String, ChangeKind), ChangeCallback>>,
}
impl Notifier {
    fn notify(&self, collection: &str, kind: ChangeKind, event: QueuedEvent) {
        let callback = self
            .callbacks
            .lock()
            .unwrap()
            .get(&(collection.to_string(), kind))
            .cloned();
        if let Some(callback) = callback {
            callback(event);
        }
    }
}
#[async_trait]
impl ChangeNotifier for Notifier {
    async fn subscribe(
        &self,
        collection: &str,
        kind: ChangeKind,
        callback: ChangeCallback,
    ) -> DomainResult<()> {
        self.callbacks
            .lock()
            .unwrap()
            .insert((collection.to_string(), kind), callback);
        Ok(())
    }
    async fn unsubscribe(&self, collection: &str, kind: ChangeKind) -> DomainResult<()> {
        self.callbacks
            .lock()
            .unwrap()
            .remove(&(collection.to_string(), kind));
        Ok(())
    }
    async fn has(&self, collection: &str, kind: ChangeKind) -> bool {
        self.callbacks
            .lock()
            .unwrap()
            .contains_key(&(collection.to_string(), kind))
    }
}

struct Store {
    collections: Mutex<HashMap<String, Vec<QueuedEvent>>>,
    next_id: AtomicUsize,
    archive_failures: AtomicUsize,
    notifier: Arc<Notifier>,
}
impl Store {
    fn new(notifier: Arc<Notifier>) -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            archive_failures: AtomicUsize::new(0),
            notifier,
        }
    }
    fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map_or(0, Vec::len)
    }
    /// 直接写入，不触发通知
    fn seed(&self, collection: &str, event: QueuedEvent) {
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .push(event);
    }
}
#[async_trait]
impl EventStore for Store {
    async fn insert(&self, collection: &str, event: QueuedEvent) -> DomainResult<QueuedEvent> {
        if collection == ARCHIVE
            && self
                .archive_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(DomainError::Store {
                reason: "archive unavailable".into(),
            });
        }
        let stored = match event.id() {
            Some(_) => event,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                event.with_id(format!("ev-{id}"))
            }
        };
        self.seed(collection, stored.clone());
        self.notifier
            .notify(collection, ChangeKind::Insert, stored.clone());
        Ok(stored)
    }
    async fn find_all(&self, collection: &str) -> DomainResult<Vec<QueuedEvent>> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }
    async fn remove_by_id(&self, collection: &str, id: &str) -> DomainResult<bool> {
        let mut guard = self.collections.lock().unwrap();
        let Some(events) = guard.get_mut(collection) else {
            return Ok(false);
        };
        let before = events.len();
        events.retain(|e| e.id() != Some(id));
        Ok(events.len() != before)
    }
    async fn clear(&self, collection: &str) -> DomainResult<()> {
        self.collections.lock().unwrap().remove(collection);
        Ok(())
    }
}

#[derive(Default)]
struct Subscribers {
    inner: Mutex<Vec<Subscriber>>,
}
impl Subscribers {
    fn add(&self, id: &str) {
        self.inner.lock().unwrap().push(
            Subscriber::builder()
                .id(id)
                .unique_identifier(format!("p-{id}"))
                .build(),
        );
    }
}
impl SubscriberSnapshot for Subscribers {
    fn all_subscribers(&self) -> Vec<Subscriber> {
        self.inner.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct Sink {
    recorded: AtomicUsize,
}
#[async_trait]
impl ResultSink for Sink {
    async fn record(
        &self,
        _event: &QueuedEvent,
        _handler_name: &str,
        _subscriber: &Subscriber,
        _steps: &[StepRecord],
    ) -> DomainResult<()> {
        self.recorded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 记录调用顺序的任务；可选地在激活前等待闸门
struct SpyTask {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    hooks: Arc<Mutex<Vec<String>>>,
    gate: Option<Arc<Notify>>,
    fail_before: bool,
}
impl SpyTask {
    fn new(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name,
            log,
            hooks: Arc::new(Mutex::new(Vec::new())),
            gate: None,
            fail_before: false,
        }
    }
}
#[async_trait]
impl Task for SpyTask {
    async fn should_activate(
        &self,
        subscriber: &Subscriber,
        _event: &QueuedEvent,
    ) -> anyhow::Result<StepResult> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", subscriber.id(), self.name));
        Ok(StepResult::success(None))
    }
    async fn do_action(
        &self,
        _subscriber: &Subscriber,
        _event: &QueuedEvent,
        _previous: &StepResult,
    ) -> anyhow::Result<StepResult> {
        Ok(StepResult::success(Some(json!({"sent": true}))))
    }
    async fn before_execution(&self, event: &QueuedEvent) -> anyhow::Result<()> {
        self.hooks
            .lock()
            .unwrap()
            .push(format!("before:{}", event.event_type()));
        if self.fail_before {
            anyhow::bail!("hook exploded");
        }
        Ok(())
    }
    async fn after_execution(&self, event: &QueuedEvent) -> anyhow::Result<()> {
        self.hooks
            .lock()
            .unwrap()
            .push(format!("after:{}", event.event_type()));
        Ok(())
    }
}

struct Harness {
    engine: Arc<EventQueueEngine>,
    store: Arc<Store>,
    subscribers: Arc<Subscribers>,
    catalog: Arc<HandlerCatalog>,
    registry: Arc<HandlerRegistry>,
    sink: Arc<Sink>,
    log: Arc<Mutex<Vec<String>>>,
}

fn harness() -> Harness {
    let notifier = Arc::new(Notifier::default());
    let store = Arc::new(Store::new(notifier.clone()));
    let subscribers = Arc::new(Subscribers::default());
    let catalog = Arc::new(HandlerCatalog::new());
    let registry = Arc::new(HandlerRegistry::new());
    let sink = Arc::new(Sink::default());

    let engine = Arc::new(
        EventQueueEngine::builder()
            .store(store.clone())
            .notifier(notifier)
            .subscribers(subscribers.clone())
            .registry(registry.clone())
            .handlers(catalog.clone(), sink.clone())
            .config(EventQueueConfig::default())
            .build(),
    );

    Harness {
        engine,
        store,
        subscribers,
        catalog,
        registry,
        sink,
        log: Arc::new(Mutex::new(Vec::new())),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}

#[tokio::test]
async fn publish_without_handlers_never_queues() -> AnyResult<()> {
    let h = harness();

    let published = h.engine.publish("E", Utc::now(), None).await?;
    assert!(published.is_none());

    for _ in 0..3 {
        h.engine.drain().await;
    }
    assert_eq!(h.store.len(QUEUE), 0);
    assert_eq!(h.store.len(ARCHIVE), 0);
    Ok(())
}

#[tokio::test]
async fn drain_archives_event_with_details_preserved() -> AnyResult<()> {
    let h = harness();
    h.catalog
        .register_task("h1", Arc::new(SpyTask::new("h1", h.log.clone())), false)?;
    h.registry.register("E", ["h1"], false)?;
    h.subscribers.add("u1");

    let mut details = EventDetails::new();
    details.insert("mood".into(), json!({"score": 4, "tags": ["tired", "ok"]}));
    let queued = h
        .engine
        .publish("E", Utc::now(), Some(details.clone()))
        .await?
        .expect("event queued");
    assert!(queued.id().is_some());

    let outcome = h.engine.drain().await;
    assert_eq!(outcome.stats().map(|s| s.archived), Some(1));

    assert!(h.engine.queued_events().await?.is_empty());
    let archived = h.engine.archived_events().await?;
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0], queued);
    assert_eq!(archived[0].event_details(), Some(&details));
    Ok(())
}

#[tokio::test]
async fn one_handler_two_subscribers_runs_twice() -> AnyResult<()> {
    let h = harness();
    h.catalog
        .register_task("h1", Arc::new(SpyTask::new("h1", h.log.clone())), false)?;
    h.registry.register("E", ["h1"], false)?;
    h.subscribers.add("u1");
    h.subscribers.add("u2");

    h.engine.publish("E", Utc::now(), None).await?;
    h.engine.drain().await;

    assert_eq!(*h.log.lock().unwrap(), vec!["u1:h1", "u2:h1"]);
    assert_eq!(h.sink.recorded.load(Ordering::SeqCst), 2);
    assert_eq!(h.store.len(ARCHIVE), 1);
    assert_eq!(h.store.len(QUEUE), 0);
    Ok(())
}

#[tokio::test]
async fn dispatch_follows_snapshot_then_registration_order() -> AnyResult<()> {
    let h = harness();
    h.catalog
        .register_task("h1", Arc::new(SpyTask::new("h1", h.log.clone())), false)?;
    h.catalog
        .register_task("h2", Arc::new(SpyTask::new("h2", h.log.clone())), false)?;
    h.registry.register("E", ["h2", "h1"], false)?;
    h.subscribers.add("u1");
    h.subscribers.add("u2");

    h.engine.publish("E", Utc::now(), None).await?;
    h.engine.drain().await;

    assert_eq!(
        *h.log.lock().unwrap(),
        vec!["u1:h2", "u1:h1", "u2:h2", "u2:h1"]
    );
    Ok(())
}

#[tokio::test]
async fn concurrent_drain_is_skipped() -> AnyResult<()> {
    let h = harness();
    let gate = Arc::new(Notify::new());
    let mut task = SpyTask::new("slow", h.log.clone());
    task.gate = Some(gate.clone());
    h.catalog.register_task("slow", Arc::new(task), false)?;
    h.registry.register("E", ["slow"], false)?;
    h.subscribers.add("u1");
    h.engine.publish("E", Utc::now(), None).await?;

    let first = h.engine.drain();
    let second = async {
        let outcome = h.engine.drain().await;
        gate.notify_one();
        outcome
    };
    let (first, second) = tokio::join!(first, second);

    assert!(!first.is_skipped());
    assert!(second.is_skipped());
    assert_eq!(h.log.lock().unwrap().len(), 1);
    assert!(!h.engine.is_draining());
    Ok(())
}

#[tokio::test]
async fn stop_lets_in_flight_drain_finish_its_batch() -> AnyResult<()> {
    let h = harness();
    let gate = Arc::new(Notify::new());
    let mut task = SpyTask::new("slow", h.log.clone());
    task.gate = Some(gate.clone());
    h.catalog.register_task("slow", Arc::new(task), false)?;
    h.registry.register("E", ["slow"], false)?;
    h.subscribers.add("u1");
    let first = h.engine.publish("E", Utc::now(), None).await?.unwrap();

    let drain = h.engine.drain();
    let control = async {
        assert!(h.engine.is_draining());
        let second = h.engine.publish("E", Utc::now(), None).await?;
        h.engine.stop().await?;
        gate.notify_one();
        Ok::<_, DomainError>(second)
    };
    let (outcome, second) = tokio::join!(drain, control);
    let second = second?.unwrap();

    let stats = outcome.stats().copied().unwrap();
    assert_eq!(stats.passes, 1);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.archived, 1);
    assert!(!h.engine.is_draining());
    assert!(!h.engine.is_accepting_work());

    let archived = h.store.find_all(ARCHIVE).await?;
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].id(), first.id());
    let queued = h.store.find_all(QUEUE).await?;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id(), second.id());
    assert_eq!(h.log.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_are_all_drained() -> AnyResult<()> {
    const EVENTS: usize = 64;
    let h = harness();
    h.catalog
        .register_task("h1", Arc::new(SpyTask::new("h1", h.log.clone())), false)?;
    h.registry.register("E", ["h1"], false)?;
    h.subscribers.add("u1");
    h.engine.start().await?;

    let mut publishers = tokio::task::JoinSet::new();
    for _ in 0..EVENTS {
        let engine = h.engine.clone();
        publishers.spawn(async move { engine.publish("E", Utc::now(), None).await });
    }
    while let Some(published) = publishers.join_next().await {
        published??;
    }

    // 不再有新的插入通知，剩余事件只能依赖被跳过的 drain 请求补偿
    wait_until(|| h.store.len(ARCHIVE) == EVENTS).await;
    assert_eq!(h.store.len(ARCHIVE), EVENTS);
    assert_eq!(h.store.len(QUEUE), 0);
    assert_eq!(h.log.lock().unwrap().len(), EVENTS);
    Ok(())
}

#[tokio::test]
async fn archive_failure_keeps_event_for_next_drain() -> AnyResult<()> {
    let h = harness();
    h.catalog
        .register_task("h1", Arc::new(SpyTask::new("h1", h.log.clone())), false)?;
    h.registry.register("E", ["h1"], false)?;
    h.subscribers.add("u1");
    h.store.archive_failures.store(1, Ordering::SeqCst);

    h.engine.publish("E", Utc::now(), None).await?;

    let first = h.engine.drain().await;
    assert_eq!(first.stats().map(|s| s.archive_failures), Some(1));
    assert_eq!(h.store.len(QUEUE), 1);
    assert_eq!(h.store.len(ARCHIVE), 0);

    let second = h.engine.drain().await;
    assert_eq!(second.stats().map(|s| s.archived), Some(1));
    assert_eq!(h.store.len(QUEUE), 0);
    assert_eq!(h.store.len(ARCHIVE), 1);

    // 归档失败的事件在下一轮会重新运行处理器
    assert_eq!(h.log.lock().unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn event_without_id_is_never_dropped() -> AnyResult<()> {
    let h = harness();
    h.catalog
        .register_task("h1", Arc::new(SpyTask::new("h1", h.log.clone())), false)?;
    h.registry.register("E", ["h1"], false)?;
    h.store.seed(QUEUE, QueuedEvent::new("E", Utc::now(), None));

    let err = h
        .engine
        .archive(&QueuedEvent::new("E", Utc::now(), None))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation { .. }));

    let outcome = h.engine.drain().await;
    assert_eq!(outcome.stats().map(|s| s.archive_failures), Some(1));
    assert_eq!(h.store.len(QUEUE), 1);
    assert_eq!(h.store.len(ARCHIVE), 0);
    Ok(())
}

#[tokio::test]
async fn lifecycle_hooks_run_once_per_event_and_failures_are_isolated() -> AnyResult<()> {
    let h = harness();
    let mut task = SpyTask::new("h1", h.log.clone());
    task.fail_before = true;
    let hooks = task.hooks.clone();
    h.catalog.register_task("h1", Arc::new(task), false)?;
    h.registry.register("E", ["h1", "missing"], false)?;
    h.subscribers.add("u1");
    h.subscribers.add("u2");

    h.engine.publish("E", Utc::now(), None).await?;
    h.engine.drain().await;

    assert_eq!(*hooks.lock().unwrap(), vec!["before:E", "after:E"]);
    assert_eq!(*h.log.lock().unwrap(), vec!["u1:h1", "u2:h1"]);
    assert_eq!(h.sink.recorded.load(Ordering::SeqCst), 2);
    assert_eq!(h.store.len(ARCHIVE), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn listener_drains_on_insert_until_stopped() -> AnyResult<()> {
    let h = harness();
    h.catalog
        .register_task("h1", Arc::new(SpyTask::new("h1", h.log.clone())), false)?;
    h.registry.register("E", ["h1"], false)?;
    h.subscribers.add("u1");

    // 监听前已入队的事件由 listen 的首次 drain 处理
    h.engine.publish("E", Utc::now(), None).await?;
    assert_eq!(h.engine.state().await, EngineState::Stopped);

    h.engine.start().await?;
    h.engine.listen().await?;
    wait_until(|| h.store.len(ARCHIVE) == 1).await;
    assert_eq!(h.store.len(ARCHIVE), 1);

    h.engine.publish("E", Utc::now(), None).await?;
    wait_until(|| h.store.len(ARCHIVE) == 2).await;
    assert_eq!(h.store.len(ARCHIVE), 2);
    assert_eq!(h.store.len(QUEUE), 0);

    h.engine.stop().await?;
    assert!(!h.engine.is_accepting_work());
    h.engine.publish("E", Utc::now(), None).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.store.len(QUEUE), 1);
    assert_eq!(h.engine.state().await, EngineState::Stopped);

    h.engine.start().await?;
    wait_until(|| h.store.len(QUEUE) == 0).await;
    assert_eq!(h.store.len(ARCHIVE), 3);
    Ok(())
}
