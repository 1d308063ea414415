//! 干预处理（intervention）
//!
//! - `HandlerRegistry`：事件类型 → 有序处理器名称列表；
//! - `HandlerCatalog`：处理器名称 → `Handler`（任务或决策规则）；
//! - `HandlerExecutor`：针对单个订阅者运行处理器的步骤流水线并记录结果。
//!
pub mod executor;
pub mod handler;
pub mod registry;

pub use executor::HandlerExecutor;
pub use handler::{DecisionRule, Handler, HandlerCatalog, HandlerKind, Task};
pub use registry::HandlerRegistry;
