use crate::error::{DomainError, DomainResult};
use bon::bon;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

use super::typed_event::TypedEvent;

/// 事件唯一标识（UUID v4）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 领域事件：某个领域事实发生时由发布方创建，创建后不可变。
///
/// 相等性按 `id` 判定，与内容无关；同一份内容重新构建会得到不同的事件。
/// 未提供 `correlation_id` 时以自身 `id` 作为关联链的起点。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    event_type: String,
    payload: Map<String, Value>,
    timestamp: DateTime<Utc>,
    correlation_id: String,
}

#[bon]
impl Event {
    /// 构建并校验事件：`event_type` 不能为空
    #[builder]
    pub fn new(
        #[builder(into)] event_type: String,
        #[builder(default)] payload: Map<String, Value>,
        #[builder(into)] correlation_id: Option<String>,
    ) -> DomainResult<Self> {
        let event_type = event_type.trim().to_string();
        if event_type.is_empty() {
            return Err(DomainError::invalid_event("event_type must not be empty"));
        }

        let id = EventId::new();
        let correlation_id = correlation_id
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| id.to_string());

        Ok(Self {
            id,
            event_type,
            payload,
            timestamp: Utc::now(),
            correlation_id,
        })
    }
}

impl Event {
    /// 由强类型事件构建，载荷必须序列化为 JSON 对象
    pub fn from_typed<E: TypedEvent>(
        event: &E,
        correlation_id: Option<String>,
    ) -> DomainResult<Self> {
        let payload = match serde_json::to_value(event)? {
            Value::Object(map) => map,
            other => {
                return Err(DomainError::invalid_event(format!(
                    "payload of {} must be an object, got {other}",
                    E::EVENT_TYPE
                )));
            }
        };

        Event::builder()
            .event_type(E::EVENT_TYPE)
            .payload(payload)
            .maybe_correlation_id(correlation_id)
            .build()
    }

    /// 将载荷解码为强类型事件，类型标识不符时返回 `TypeMismatch`
    pub fn decode<E: TypedEvent>(&self) -> DomainResult<E> {
        if self.event_type != E::EVENT_TYPE {
            return Err(DomainError::TypeMismatch {
                expected: E::EVENT_TYPE.to_string(),
                found: self.event_type.clone(),
            });
        }
        Ok(serde_json::from_value(Value::Object(self.payload.clone()))?)
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
