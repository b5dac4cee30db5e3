use crate::error::{DomainError, DomainResult};
use serde_json::Value;
use std::collections::HashMap;

use super::chat_events::{ErrorOccurred, RequestCompleted, RequestInitiated, ResponseReceived};
use super::event::Event;
use super::typed_event::TypedEvent;

/// 载荷字段的 JSON 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Bool,
    Object,
    Array,
    Any,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
            FieldKind::Any => !value.is_null(),
        }
    }
}

/// 某个事件类型的载荷约束：必填字段及其类型
#[derive(Debug, Clone, Default)]
pub struct PayloadSchema {
    required: Vec<(String, FieldKind)>,
}

impl PayloadSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, field: impl Into<String>, kind: FieldKind) -> Self {
        self.required.push((field.into(), kind));
        self
    }

    pub fn validate(&self, event: &Event) -> DomainResult<()> {
        for (field, kind) in &self.required {
            match event.payload().get(field) {
                None | Some(Value::Null) => {
                    return Err(DomainError::invalid_event(format!(
                        "{}: missing required field `{field}`",
                        event.event_type()
                    )));
                }
                Some(value) if !kind.matches(value) => {
                    return Err(DomainError::invalid_event(format!(
                        "{}: field `{field}` expected {kind:?}, got {value}",
                        event.event_type()
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// 以事件类型为键的载荷模式表；未登记的类型不做约束
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, PayloadSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置聊天领域事件的模式
    pub fn chat_events() -> Self {
        Self::new()
            .with(
                RequestInitiated::EVENT_TYPE,
                PayloadSchema::new()
                    .require("request_id", FieldKind::String)
                    .require("user_id", FieldKind::String)
                    .require("prompt", FieldKind::String),
            )
            .with(
                RequestCompleted::EVENT_TYPE,
                PayloadSchema::new()
                    .require("request_id", FieldKind::String)
                    .require("tokens_used", FieldKind::Number),
            )
            .with(
                ResponseReceived::EVENT_TYPE,
                PayloadSchema::new().require("tokens_used", FieldKind::Number),
            )
            .with(
                ErrorOccurred::EVENT_TYPE,
                PayloadSchema::new()
                    .require("error_type", FieldKind::String)
                    .require("error_message", FieldKind::String),
            )
    }

    pub fn with(mut self, event_type: impl Into<String>, schema: PayloadSchema) -> Self {
        self.register(event_type, schema);
        self
    }

    pub fn register(&mut self, event_type: impl Into<String>, schema: PayloadSchema) {
        self.schemas.insert(event_type.into(), schema);
    }

    pub fn get(&self, event_type: &str) -> Option<&PayloadSchema> {
        self.schemas.get(event_type)
    }

    pub fn validate(&self, event: &Event) -> DomainResult<()> {
        match self.schemas.get(event.event_type()) {
            Some(schema) => schema.validate(event),
            None => Ok(()),
        }
    }
}
