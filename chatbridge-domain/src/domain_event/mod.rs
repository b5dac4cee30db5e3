//! 领域事件（Domain Event）
//!
//! 定义总线上流转的不可变事件 `Event`、强类型载荷约束 `TypedEvent`、
//! 聊天领域的事件集合 `ChatEvent`，以及按事件类型校验通用载荷的 `SchemaRegistry`。

mod chat_events;
mod event;
mod schema;
mod typed_event;

pub use chat_events::{
    ChatEvent, ErrorOccurred, RequestCompleted, RequestInitiated, ResponseReceived,
};
pub use event::{Event, EventId};
pub use schema::{FieldKind, PayloadSchema, SchemaRegistry};
pub use typed_event::TypedEvent;
