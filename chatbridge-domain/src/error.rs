//! 领域层统一错误定义
//!
//! 聚焦事件校验、事件系统、配置等最小必要集合，
//! 便于在各实现层统一转换为 `DomainError`。
//!
use thiserror::Error;

/// 统一错误类型（基础库最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 序列化/事件模型 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("invalid event: {reason}")]
    InvalidEvent { reason: String },
    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch { expected: String, found: String },

    // --- 事件系统 ---
    #[error("event bus error: {reason}")]
    EventBus { reason: String },
    #[error("event handler error: handler={handler}, reason={reason}")]
    EventHandler { handler: String, reason: String },
    #[error("subscription registry poisoned")]
    RegistryPoisoned,
    #[error("dead letter sink error: {reason}")]
    DeadLetter { reason: String },

    // --- 配置 ---
    #[error("invalid config: key={key}, reason={reason}")]
    Config { key: String, reason: String },
}

impl DomainError {
    pub fn invalid_event(reason: impl Into<String>) -> Self {
        DomainError::InvalidEvent {
            reason: reason.into(),
        }
    }

    pub fn event_bus(reason: impl Into<String>) -> Self {
        DomainError::EventBus {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;
