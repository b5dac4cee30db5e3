//! 事件子系统（eventing）
//!
//! 提供进程内事件发布/订阅与处理的基础抽象与运行时：
//! - `EventBus`：统一发布/订阅接口，亦是替换为外部消息中间件时的传输契约；
//! - `EventHandler`：对某一事件类型进行消费处理；
//! - `InMemoryEventBus`：每个订阅独占一个投递任务，保证单订阅者 FIFO；
//! - `DeliveryAttempt`/`RetryPolicy`：单次投递的状态机与指数退避；
//! - `DeadLetterSink`：重试耗尽后的死信存储。
//!
pub mod bus;
pub mod bus_inmemory;
pub mod config;
pub mod dead_letter;
pub mod delivery;
pub mod handler;
pub mod metrics;
mod registry;
mod worker;

pub use bus::{EventBus, EventBusExt, SubscriptionHandle, SubscriptionId};
pub use bus_inmemory::InMemoryEventBus;
pub use config::EventBusConfig;
pub use dead_letter::{
    DeadLetterRecord, DeadLetterSink, InMemoryDeadLetterSink, JsonLinesDeadLetterSink,
};
pub use delivery::{DeliveryAttempt, DeliveryState, FailureRecord, RetryPolicy, Transition};
pub use handler::{EventHandler, FnHandler, handler_fn};
pub use metrics::{BusMetrics, MetricsSnapshot};
