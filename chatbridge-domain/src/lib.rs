//! chatbridge 领域层基础库（chatbridge-domain）
//!
//! 为“LLM API 封装后端”提供用例与副作用适配器之间的解耦机制：
//! - 领域事件（`domain_event`）：不可变事件模型、聊天领域的强类型事件与载荷模式校验；
//! - 事件系统（`eventing`）：进程内发布/订阅总线、处理器、带退避的重试与死信投递。
//!
//! 本 crate 不绑定具体传输实现：`eventing::EventBus` 即为传输契约，
//! 内存实现之外可对接任意外部消息中间件。
//!
//! 典型用法：
//! 1. 启动时通过 `subscribe` 注册日志、持久化、通知等处理器；
//! 2. 用例完成业务后通过 `publish`/`emit` 发布事件，立即返回；
//! 3. 处理失败由总线重试，耗尽后写入死信存储，等待人工或外部重放。
//!
pub mod domain_event;
pub mod error;
#[cfg(feature = "eventing")]
pub mod eventing;
