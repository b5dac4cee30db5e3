//! 事件处理器（EventHandler）
//!
//! 定义消费某类事件的处理逻辑与元信息（名称）。处理器需可重入：
//! 同一处理器可能同时服务多个订阅，且在重试下须保持幂等。
//!
use crate::domain_event::Event;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// 事件处理器：处理某一类型的事件
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器名称（用于日志、死信记录与审计）
    fn handler_name(&self) -> &str;
    /// 处理事件，返回错误即视为一次失败
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// 以闭包实现的处理器
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// 将异步闭包包装为处理器
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<FnHandler<F>>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn handler_name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }
}
