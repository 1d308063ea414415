//! 步骤结果与审计记录
//!
//! 处理器流水线中每个步骤（`shouldActivate` / `selectAction` / `doAction`）返回
//! `StepResult`，执行器为其打上时间戳后追加为不可变的 `StepRecord`。
//!
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// 步骤状态
///
/// 合法取值仅有 `success` / `stop` / `error`；来自动态处理器的其它取值
/// 以 `Other` 保留原文，由执行器统一降级为错误记录。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepStatus {
    Success,
    Stop,
    Error,
    Other(String),
}

impl StepStatus {
    pub fn as_str(&self) -> &str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Stop => "stop",
            StepStatus::Error => "error",
            StepStatus::Other(raw) => raw,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, StepStatus::Other(_))
    }
}

impl From<String> for StepStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "success" => StepStatus::Success,
            "stop" => StepStatus::Stop,
            "error" => StepStatus::Error,
            _ => StepStatus::Other(raw),
        }
    }
}

impl From<&str> for StepStatus {
    fn from(raw: &str) -> Self {
        StepStatus::from(raw.to_string())
    }
}

impl From<StepStatus> for String {
    fn from(status: StepStatus) -> Self {
        match status {
            StepStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个步骤的返回值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl StepResult {
    pub fn success(result: Option<Value>) -> Self {
        Self {
            status: StepStatus::Success,
            result,
            error: None,
        }
    }

    pub fn stop() -> Self {
        Self {
            status: StepStatus::Stop,
            result: None,
            error: None,
        }
    }

    pub fn error(error: impl Into<Value>) -> Self {
        Self {
            status: StepStatus::Error,
            result: None,
            error: Some(error.into()),
        }
    }

    /// 仅 `success` 允许流水线继续
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// 流水线步骤名称
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepKind {
    ShouldActivate,
    SelectAction,
    DoAction,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::ShouldActivate => "shouldActivate",
            StepKind::SelectAction => "selectAction",
            StepKind::DoAction => "doAction",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 不可变的步骤审计记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: StepKind,
    pub result: StepResult,
    pub timestamp: DateTime<Utc>,
}
