//! 干预执行引擎领域层（nudge-domain）
//!
//! 面向行为/研究类应用，在事件发生时向参与者投递“干预”（任务与决策规则）：
//! - 事件数据模型（`event`）、订阅者（`subscriber`）与步骤审计（`step`）；
//! - 外部协作方协议（`port`）：存储、变更通知、订阅者快照、结果记录；
//! - 处理器注册、目录与执行流水线（`intervention`）；
//! - 事件队列引擎与定时事件生成器（`eventing`）。
//!
//! 本 crate 不绑定任何存储或通知实现，仅定义协议与调度逻辑，
//! 具体适配（内存实现等）由上层提供并注入。
//!
//! 典型用法：
//! 1. 在 `HandlerCatalog` 中注册任务/决策规则，在 `HandlerRegistry` 中绑定事件类型；
//! 2. 使用 `EventQueueEngine::builder()` 注入存储、通知与订阅者快照；
//! 3. `start` 引擎后通过 `publish` 或 `IntervalTimerEventGenerator` 产生事件。
//!
pub mod error;
pub mod event;
pub mod eventing;
pub mod intervention;
pub mod port;
pub mod step;
pub mod subscriber;
