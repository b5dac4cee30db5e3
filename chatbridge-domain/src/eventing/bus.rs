//! 事件总线（EventBus）协议
//!
//! 定义事件发布与订阅的统一抽象。内存实现与外部消息中间件适配器
//! 实现同一契约，调用方无需感知传输方式。
//!
use super::handler::EventHandler;
use crate::domain_event::{Event, EventId, TypedEvent};
use crate::error::DomainResult as Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// 订阅标识，由总线在 `subscribe` 时分配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// 订阅句柄：用于 `unsubscribe`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    event_type: String,
    handler: String,
}

impl SubscriptionHandle {
    pub fn new(id: SubscriptionId, event_type: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            handler: handler.into(),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }
}

/// 事件总线：同步受理、异步投递
#[async_trait]
pub trait EventBus: Send + Sync {
    /// 受理事件并为每个订阅者安排投递，不等待处理器执行。
    /// 无订阅者时静默丢弃；仅事件校验失败会返回错误。
    async fn publish(&self, event: Event) -> Result<()>;

    async fn publish_batch(&self, events: Vec<Event>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }

    /// 按注册顺序追加处理器
    async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionHandle>;

    /// 移除处理器；已安排的投递不会被取消。返回是否确实移除了订阅
    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<bool>;
}

/// 基于 `EventBus` 的便捷发布方法
#[async_trait]
pub trait EventBusExt: EventBus {
    /// 以 (类型, 载荷, 关联 ID) 形式发布，返回新事件的 ID
    async fn emit(
        &self,
        event_type: &str,
        payload: Map<String, Value>,
        correlation_id: Option<String>,
    ) -> Result<EventId> {
        let event = Event::builder()
            .event_type(event_type)
            .payload(payload)
            .maybe_correlation_id(correlation_id)
            .build()?;
        let id = event.id();
        self.publish(event).await?;
        Ok(id)
    }

    async fn publish_typed<E>(&self, event: &E, correlation_id: Option<String>) -> Result<EventId>
    where
        E: TypedEvent,
    {
        let event = Event::from_typed(event, correlation_id)?;
        let id = event.id();
        self.publish(event).await?;
        Ok(id)
    }
}

impl<T: EventBus + ?Sized> EventBusExt for T {}
