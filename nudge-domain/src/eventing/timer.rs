//! 定时事件生成器（IntervalTimerEventGenerator）
//!
//! 以固定节拍发布同一类型的事件，两种模式：
//! - 实时模式：每隔 `interval_ms` 以当前时间发布一次；
//! - 模拟模式（给定 `simulated_start_date`）：每隔 `simulated_tick_duration_ms`
//!   触发一次，但发布的时间戳自起始时间按 `interval_ms` 递增，
//!   即触发节拍与时间戳节拍相互独立；达到 `simulated_tick_count_max` 次后自动停止。
//!
//! 第 n 次触发（从 1 计）的模拟时间戳为 `simulated_start_date + n * interval_ms`。
//!
use crate::{
    error::{DomainError, DomainResult as Result},
    port::EventPublisher,
};
use bon::Builder;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SIMULATED_TICK_COUNT_MAX: u32 = 10;

/// 定时器可选项
#[derive(Builder, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntervalTimerOptions {
    /// 给定时进入模拟模式
    simulated_start_date: Option<DateTime<Utc>>,
    /// 模拟模式下的真实触发间隔，缺省与 `interval_ms` 相同
    simulated_tick_duration_ms: Option<u64>,
    /// 模拟模式下的最大触发次数，缺省 10
    simulated_tick_count_max: Option<u32>,
}

impl IntervalTimerOptions {
    pub fn simulated_start_date(&self) -> Option<DateTime<Utc>> {
        self.simulated_start_date
    }

    pub fn simulated_tick_duration_ms(&self) -> Option<u64> {
        self.simulated_tick_duration_ms
    }

    pub fn simulated_tick_count_max(&self) -> u32 {
        self.simulated_tick_count_max
            .unwrap_or(DEFAULT_SIMULATED_TICK_COUNT_MAX)
    }

    pub fn is_simulated(&self) -> bool {
        self.simulated_start_date.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
enum TickSchedule {
    RealTime {
        period: Duration,
    },
    Simulated {
        cadence: Duration,
        start: DateTime<Utc>,
        step: TimeDelta,
        max_ticks: u32,
    },
}

impl TickSchedule {
    fn cadence(&self) -> Duration {
        match self {
            TickSchedule::RealTime { period } => *period,
            TickSchedule::Simulated { cadence, .. } => *cadence,
        }
    }

    fn exhausted(&self, ticks: u32) -> bool {
        match self {
            TickSchedule::RealTime { .. } => false,
            TickSchedule::Simulated { max_ticks, .. } => ticks >= *max_ticks,
        }
    }

    /// 第 `tick` 次触发的事件时间；超出可表示范围时为 `None`
    fn timestamp_for(&self, tick: u32) -> Option<DateTime<Utc>> {
        match self {
            TickSchedule::RealTime { .. } => Some(Utc::now()),
            TickSchedule::Simulated { start, step, .. } => simulated_timestamp(*start, *step, tick),
        }
    }
}

fn simulated_timestamp(start: DateTime<Utc>, step: TimeDelta, tick: u32) -> Option<DateTime<Utc>> {
    let offset = step.checked_mul(i32::try_from(tick).ok()?)?;
    start.checked_add_signed(offset)
}

struct TimerRun {
    token: CancellationToken,
    task: JoinHandle<()>,
}

pub struct IntervalTimerEventGenerator {
    interval_ms: u64,
    event_type: String,
    options: IntervalTimerOptions,
    schedule: TickSchedule,
    publisher: Arc<dyn EventPublisher>,
    run: Mutex<Option<TimerRun>>,
}

impl IntervalTimerEventGenerator {
    /// `interval_ms` 必须大于 0，`event_type` 不能为空，否则返回 `Validation`
    pub fn new(
        interval_ms: u64,
        event_type: impl Into<String>,
        options: IntervalTimerOptions,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        let event_type = event_type.into();
        if interval_ms == 0 {
            return Err(DomainError::validation("interval_ms must be greater than 0"));
        }
        if event_type.trim().is_empty() {
            return Err(DomainError::validation("event type must be a non-empty string"));
        }
        if options.simulated_tick_duration_ms == Some(0) {
            return Err(DomainError::validation(
                "simulated_tick_duration_ms must be greater than 0",
            ));
        }

        let period = Duration::from_millis(interval_ms);
        let schedule = match options.simulated_start_date {
            None => TickSchedule::RealTime { period },
            Some(start) => {
                let step = i64::try_from(interval_ms)
                    .ok()
                    .and_then(TimeDelta::try_milliseconds)
                    .ok_or_else(|| DomainError::validation("interval_ms is out of range"))?;
                let max_ticks = options.simulated_tick_count_max();
                // 最后一次触发的时间戳必须可表示
                if simulated_timestamp(start, step, max_ticks).is_none() {
                    return Err(DomainError::validation(format!(
                        "simulated timestamps overflow after {max_ticks} ticks of {interval_ms}ms"
                    )));
                }
                TickSchedule::Simulated {
                    cadence: options
                        .simulated_tick_duration_ms
                        .map(Duration::from_millis)
                        .unwrap_or(period),
                    start,
                    step,
                    max_ticks,
                }
            }
        };

        Ok(Self {
            interval_ms,
            event_type,
            options,
            schedule,
            publisher,
            run: Mutex::new(None),
        })
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn options(&self) -> &IntervalTimerOptions {
        &self.options
    }

    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|run| !run.task.is_finished())
    }

    /// 启动定时任务；已在运行时为空操作
    pub fn start(&self) {
        let mut slot = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|run| !run.task.is_finished()) {
            tracing::debug!(event_type = %self.event_type, "interval timer already running");
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(event_type = %self.event_type, "no async runtime available, interval timer not started");
            return;
        };
        let token = CancellationToken::new();
        let task = runtime.spawn(Self::tick_loop(
            self.schedule,
            self.event_type.clone(),
            self.publisher.clone(),
            token.clone(),
        ));
        *slot = Some(TimerRun { token, task });

        tracing::info!(
            event_type = %self.event_type,
            interval_ms = self.interval_ms,
            simulated = self.options.is_simulated(),
            "interval timer started"
        );
    }

    /// 停止定时任务；可重复调用，也可在 `start` 之前调用
    pub fn stop(&self) {
        let run = self.run.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(run) = run {
            run.token.cancel();
            tracing::info!(event_type = %self.event_type, "interval timer stopped");
        }
    }

    async fn tick_loop(
        schedule: TickSchedule,
        event_type: String,
        publisher: Arc<dyn EventPublisher>,
        token: CancellationToken,
    ) {
        let cadence = schedule.cadence();
        let mut ticker = time::interval_at(Instant::now() + cadence, cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks: u32 = 0;

        loop {
            if schedule.exhausted(ticks) {
                tracing::info!(%event_type, ticks, "simulated timer reached its tick limit");
                break;
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    ticks += 1;
                    let Some(timestamp) = schedule.timestamp_for(ticks) else {
                        tracing::warn!(%event_type, tick = ticks, "timer timestamp out of range, stopping");
                        break;
                    };
                    tracing::trace!(%event_type, tick = ticks, %timestamp, "timer tick");
                    if let Err(err) = publisher.publish(&event_type, timestamp, None).await {
                        tracing::warn!(%event_type, error = %err, "failed to publish timer event");
                    }
                }
            }
        }
    }
}

impl Drop for IntervalTimerEventGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}
