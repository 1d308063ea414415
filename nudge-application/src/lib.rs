//! 干预运行时的应用层
//!
//! 提供领域端口的内存实现，以及把注册表、引擎与定时器装配在一起的 [`InterventionRuntime`]。
//!
pub mod error;
pub mod notifier;
pub mod result_sink;
pub mod runtime;
pub mod store;
pub mod subscribers;

pub use error::AppError;
pub use notifier::InMemoryChangeNotifier;
pub use result_sink::{HandlerResult, InMemoryResultSink};
pub use runtime::{InterventionRuntime, RuntimeConfig};
pub use store::InMemoryEventStore;
pub use subscribers::InMemorySubscriberDirectory;
