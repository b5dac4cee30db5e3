use crate::error::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::event::Event;
use super::typed_event::TypedEvent;

/// 发起一次 LLM 请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInitiated {
    pub request_id: String,
    pub user_id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl TypedEvent for RequestInitiated {
    const EVENT_TYPE: &'static str = "request_initiated";
}

/// 请求成功完成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestCompleted {
    pub request_id: String,
    pub tokens_used: u32,
}

impl TypedEvent for RequestCompleted {
    const EVENT_TYPE: &'static str = "request_completed";
}

/// 收到上游 API 的响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseReceived {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub tokens_used: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl TypedEvent for ResponseReceived {
    const EVENT_TYPE: &'static str = "response_received";
}

/// 请求处理过程中出现错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorOccurred {
    pub error_type: String,
    pub error_message: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl ErrorOccurred {
    pub fn from_error<E>(error: &E, context: Map<String, Value>) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let type_name = std::any::type_name::<E>();
        let error_type = type_name.rsplit("::").next().unwrap_or(type_name);
        Self {
            error_type: error_type.to_string(),
            error_message: error.to_string(),
            context,
        }
    }
}

impl TypedEvent for ErrorOccurred {
    const EVENT_TYPE: &'static str = "error_occurred";
}

/// 聊天领域事件的标签联合，按 `event_type` 分派
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    RequestInitiated(RequestInitiated),
    RequestCompleted(RequestCompleted),
    ResponseReceived(ResponseReceived),
    ErrorOccurred(ErrorOccurred),
}

impl ChatEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::RequestInitiated(_) => RequestInitiated::EVENT_TYPE,
            ChatEvent::RequestCompleted(_) => RequestCompleted::EVENT_TYPE,
            ChatEvent::ResponseReceived(_) => ResponseReceived::EVENT_TYPE,
            ChatEvent::ErrorOccurred(_) => ErrorOccurred::EVENT_TYPE,
        }
    }

    pub fn into_event(self, correlation_id: Option<String>) -> DomainResult<Event> {
        match self {
            ChatEvent::RequestInitiated(e) => Event::from_typed(&e, correlation_id),
            ChatEvent::RequestCompleted(e) => Event::from_typed(&e, correlation_id),
            ChatEvent::ResponseReceived(e) => Event::from_typed(&e, correlation_id),
            ChatEvent::ErrorOccurred(e) => Event::from_typed(&e, correlation_id),
        }
    }
}

impl TryFrom<&Event> for ChatEvent {
    type Error = DomainError;

    fn try_from(event: &Event) -> Result<Self, Self::Error> {
        match event.event_type() {
            RequestInitiated::EVENT_TYPE => event.decode().map(ChatEvent::RequestInitiated),
            RequestCompleted::EVENT_TYPE => event.decode().map(ChatEvent::RequestCompleted),
            ResponseReceived::EVENT_TYPE => event.decode().map(ChatEvent::ResponseReceived),
            ErrorOccurred::EVENT_TYPE => event.decode().map(ChatEvent::ErrorOccurred),
            other => Err(DomainError::TypeMismatch {
                expected: "chat event".to_string(),
                found: other.to_string(),
            }),
        }
    }
}
