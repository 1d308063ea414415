//! 事件子系统（eventing）
//!
//! - `EventQueueEngine`：发布、drain、归档与插入通知驱动的触发；
//! - `IntervalTimerEventGenerator`：按固定节拍生成实时或模拟时间的事件。
//!
pub mod engine;
pub mod timer;

pub use engine::{DrainOutcome, DrainStats, EngineState, EventQueueConfig, EventQueueEngine};
pub use timer::{DEFAULT_SIMULATED_TICK_COUNT_MAX, IntervalTimerEventGenerator, IntervalTimerOptions};
