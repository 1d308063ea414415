//! 处理器注册表（HandlerRegistry）
//!
//! 维护事件类型到有序处理器名称列表的映射。注册通常发生在启动装配阶段，
//! 每次注册以整表替换的方式写入，不存在部分更新的中间状态。
//!
use crate::error::{DomainError, DomainResult as Result};
use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::Arc;

#[derive(Default)]
pub struct HandlerRegistry {
    by_type: DashMap<String, Arc<[String]>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为事件类型注册有序处理器名称
    ///
    /// - 事件类型为空、名称列表为空或包含空名称时返回 `Validation`；
    /// - 已存在注册且 `overwrite` 为 false 时返回 `AlreadyRegistered`。
    pub fn register<I>(&self, event_type: &str, handler_names: I, overwrite: bool) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        if event_type.trim().is_empty() {
            return Err(DomainError::validation("event type must be a non-empty string"));
        }

        let names: Vec<String> = handler_names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(DomainError::validation(format!(
                "handler names for `{event_type}` must not be empty"
            )));
        }
        if names.iter().any(|n| n.trim().is_empty()) {
            return Err(DomainError::validation(format!(
                "handler names for `{event_type}` must be non-empty strings"
            )));
        }

        match self.by_type.entry(event_type.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !overwrite {
                    return Err(DomainError::AlreadyRegistered {
                        kind: "event type",
                        name: event_type.to_string(),
                    });
                }
                occupied.insert(names.into());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(names.into());
            }
        }

        tracing::debug!(event_type, "handlers registered");
        Ok(())
    }

    /// 注销事件类型；不存在时仅告警，返回是否确有注销
    pub fn unregister(&self, event_type: &str) -> bool {
        if self.by_type.remove(event_type).is_none() {
            tracing::warn!(event_type, "no handlers registered for event type, nothing to unregister");
            return false;
        }
        tracing::debug!(event_type, "handlers unregistered");
        true
    }

    /// 返回事件类型对应的处理器名称；未注册时返回空列表
    pub fn handlers_for(&self, event_type: &str) -> Vec<String> {
        match self.by_type.get(event_type) {
            Some(names) => names.to_vec(),
            None => {
                tracing::debug!(event_type, "no handlers registered for event type");
                Vec::new()
            }
        }
    }

    pub fn has(&self, event_type: &str) -> bool {
        self.by_type.contains_key(event_type)
    }

    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.by_type.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn clear(&self) {
        self.by_type.clear();
    }
}
