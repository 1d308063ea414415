//! 外部协作方协议（port）
//!
//! 引擎只依赖以下抽象能力，不绑定具体存储或通知实现：
//! - `EventStore`：按集合名进行插入/全量查询/按 id 删除/清空；
//! - `ChangeNotifier`：订阅某集合的插入通知；
//! - `SubscriberSnapshot`：当前全部订阅者的内存快照；
//! - `ResultSink`：记录每次处理器执行的步骤审计；
//! - `EventPublisher`：发布事件的入口（引擎实现，计时器消费）。
//!
pub mod notifier;
pub mod publisher;
pub mod result_sink;
pub mod store;
pub mod subscriber_snapshot;

pub use notifier::{ChangeCallback, ChangeKind, ChangeNotifier};
pub use publisher::EventPublisher;
pub use result_sink::ResultSink;
pub use store::EventStore;
pub use subscriber_snapshot::SubscriberSnapshot;
