//! 处理器（Handler）
//!
//! 处理器分为两类，均以名称查找：
//! - `Task`：`should_activate → do_action`；
//! - `DecisionRule`：`should_activate → select_action → do_action`。
//!
//! 两者共享生命周期钩子 `before_execution` / `after_execution`，默认实现为空操作。
//! 名称到处理器的映射集中于 `HandlerCatalog`，同一名称只对应一种处理器。
//!
use crate::{
    error::{DomainError, DomainResult as Result},
    event::QueuedEvent,
    step::StepResult,
    subscriber::Subscriber,
};
use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use std::{fmt, sync::Arc};

/// 任务：满足激活条件即执行动作
#[async_trait]
pub trait Task: Send + Sync {
    async fn should_activate(
        &self,
        subscriber: &Subscriber,
        event: &QueuedEvent,
    ) -> anyhow::Result<StepResult>;

    /// `previous` 为 `should_activate` 的结果
    async fn do_action(
        &self,
        subscriber: &Subscriber,
        event: &QueuedEvent,
        previous: &StepResult,
    ) -> anyhow::Result<StepResult>;

    /// 事件分发给任何订阅者之前调用一次
    async fn before_execution(&self, _event: &QueuedEvent) -> anyhow::Result<()> {
        Ok(())
    }

    /// 事件分发给全部订阅者之后调用一次
    async fn after_execution(&self, _event: &QueuedEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 决策规则：激活后先选择动作，再执行动作
#[async_trait]
pub trait DecisionRule: Send + Sync {
    async fn should_activate(
        &self,
        subscriber: &Subscriber,
        event: &QueuedEvent,
    ) -> anyhow::Result<StepResult>;

    /// `previous` 为 `should_activate` 的结果
    async fn select_action(
        &self,
        subscriber: &Subscriber,
        event: &QueuedEvent,
        previous: &StepResult,
    ) -> anyhow::Result<StepResult>;

    /// `previous` 为 `select_action` 的结果
    async fn do_action(
        &self,
        subscriber: &Subscriber,
        event: &QueuedEvent,
        previous: &StepResult,
    ) -> anyhow::Result<StepResult>;

    async fn before_execution(&self, _event: &QueuedEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_execution(&self, _event: &QueuedEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Task,
    DecisionRule,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerKind::Task => f.write_str("task"),
            HandlerKind::DecisionRule => f.write_str("decision-rule"),
        }
    }
}

#[derive(Clone)]
pub enum Handler {
    Task(Arc<dyn Task>),
    DecisionRule(Arc<dyn DecisionRule>),
}

impl Handler {
    pub fn kind(&self) -> HandlerKind {
        match self {
            Handler::Task(_) => HandlerKind::Task,
            Handler::DecisionRule(_) => HandlerKind::DecisionRule,
        }
    }

    pub async fn before_execution(&self, event: &QueuedEvent) -> anyhow::Result<()> {
        match self {
            Handler::Task(task) => task.before_execution(event).await,
            Handler::DecisionRule(rule) => rule.before_execution(event).await,
        }
    }

    pub async fn after_execution(&self, event: &QueuedEvent) -> anyhow::Result<()> {
        match self {
            Handler::Task(task) => task.after_execution(event).await,
            Handler::DecisionRule(rule) => rule.after_execution(event).await,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.kind()).finish()
    }
}

/// 处理器目录：名称 → 处理器
#[derive(Default)]
pub struct HandlerCatalog {
    handlers: DashMap<String, Handler>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_task(
        &self,
        name: impl Into<String>,
        task: Arc<dyn Task>,
        overwrite: bool,
    ) -> Result<()> {
        self.register(name, Handler::Task(task), overwrite)
    }

    pub fn register_rule(
        &self,
        name: impl Into<String>,
        rule: Arc<dyn DecisionRule>,
        overwrite: bool,
    ) -> Result<()> {
        self.register(name, Handler::DecisionRule(rule), overwrite)
    }

    /// 注册处理器；名称已存在且 `overwrite` 为 false 时返回 `AlreadyRegistered`
    pub fn register(&self, name: impl Into<String>, handler: Handler, overwrite: bool) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("handler name must be a non-empty string"));
        }

        match self.handlers.entry(name) {
            Entry::Occupied(mut occupied) => {
                if !overwrite {
                    return Err(DomainError::AlreadyRegistered {
                        kind: "handler",
                        name: occupied.key().clone(),
                    });
                }
                tracing::debug!(handler = %occupied.key(), kind = %handler.kind(), "replacing handler");
                occupied.insert(handler);
            }
            Entry::Vacant(vacant) => {
                tracing::debug!(handler = %vacant.key(), kind = %handler.kind(), "registering handler");
                vacant.insert(handler);
            }
        }

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).map(|h| h.value().clone())
    }

    pub fn remove(&self, name: &str) -> Option<Handler> {
        self.handlers.remove(name).map(|(_, h)| h)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// 已注册名称（按字典序）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|h| h.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }
}
