use crate::{context::AppContext, error::AppError};
use chatbridge_domain::domain_event::{ChatEvent, EventId, TypedEvent};
use chatbridge_domain::eventing::{EventBus, EventBusExt};
use serde_json::{Map, Value};
use std::sync::Arc;

/// 用例侧的事件发布端口
///
/// 从 `AppContext` 取关联 ID 写入事件，发布后立即返回；
/// 下游处理器的失败不会影响用例结果。
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    pub async fn publish<E>(&self, ctx: &AppContext, event: &E) -> Result<EventId, AppError>
    where
        E: TypedEvent,
    {
        Ok(self
            .bus
            .publish_typed(event, ctx.correlation_id.clone())
            .await?)
    }

    pub async fn publish_chat(&self, ctx: &AppContext, event: ChatEvent) -> Result<EventId, AppError> {
        let event = event.into_event(ctx.correlation_id.clone())?;
        let id = event.id();
        self.bus.publish(event).await?;
        Ok(id)
    }

    /// 发布未登记强类型的事件，载荷须为 JSON 对象
    pub async fn publish_raw(
        &self,
        ctx: &AppContext,
        event_type: &str,
        payload: Value,
    ) -> Result<EventId, AppError> {
        let payload: Map<String, Value> = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(AppError::Validation(format!(
                    "payload of {event_type} must be an object, got {other}"
                )));
            }
        };
        Ok(self
            .bus
            .emit(event_type, payload, ctx.correlation_id.clone())
            .await?)
    }
}
