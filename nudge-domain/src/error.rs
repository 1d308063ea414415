//! 领域层统一错误定义
//!
//! 聚焦注册校验、存储与步骤执行等最小必要集合，
//! 便于在各实现层统一转换为 `DomainError`。
//!
use thiserror::Error;

/// 统一错误类型（基础库最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 注册/构造校验 ---
    #[error("validation error: {reason}")]
    Validation { reason: String },
    #[error("already registered: {kind}={name}")]
    AlreadyRegistered { kind: &'static str, name: String },

    // --- 协作方（存储/通知）由适配器返回 ---
    #[error("store error: {reason}")]
    Store { reason: String },

    // --- 处理器执行 ---
    #[error("step execution error: step={step}, reason={reason}")]
    StepExecution { step: String, reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
}

impl DomainError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;
