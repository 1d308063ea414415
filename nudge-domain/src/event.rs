//! 队列事件（QueuedEvent）
//!
//! 事件在队列/归档存储中的标准形态。事件仅在持久化时获得 `id`，
//! 未归档前归队列所有，归档后归档存储所有，二者不会同时持有。
//!
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 事件附带的任意键值详情
pub type EventDetails = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedEvent {
    /// 存储层生成的标识，持久化前为空
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    /// 事件类型，用于匹配处理器注册
    #[builder(into)]
    event_type: String,
    /// 事件产生时间（模拟计时器下为模拟时间）
    generated_timestamp: DateTime<Utc>,
    /// 事件详情
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_details: Option<EventDetails>,
}

impl QueuedEvent {
    pub fn new(
        event_type: impl Into<String>,
        generated_timestamp: DateTime<Utc>,
        event_details: Option<EventDetails>,
    ) -> Self {
        Self {
            id: None,
            event_type: event_type.into(),
            generated_timestamp,
            event_details,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn generated_timestamp(&self) -> DateTime<Utc> {
        self.generated_timestamp
    }

    pub fn event_details(&self) -> Option<&EventDetails> {
        self.event_details.as_ref()
    }

    /// 由存储层在持久化时赋予标识
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}
