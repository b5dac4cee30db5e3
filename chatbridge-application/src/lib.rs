//! chatbridge 应用层
//!
//! 用例通过 `EventPublisher` 发布领域事件，启动阶段通过 `subscribers`
//! 注册默认的日志与用量统计处理器。
pub mod context;
pub mod error;
pub mod publisher;
pub mod subscribers;

pub use context::AppContext;
pub use error::AppError;
pub use publisher::EventPublisher;
pub use subscribers::{LoggingHandler, TokenUsageHandler, subscribe_defaults};
