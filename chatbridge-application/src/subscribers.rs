//! 默认订阅者
//!
//! - `LoggingHandler`：以结构化日志记录聊天领域事件；
//! - `TokenUsageHandler`：按请求累计 token 用量（对重试幂等）。
//!
use async_trait::async_trait;
use chatbridge_domain::domain_event::{
    ChatEvent, ErrorOccurred, Event, EventId, RequestCompleted, RequestInitiated,
    ResponseReceived, TypedEvent,
};
use chatbridge_domain::error::DomainResult;
use chatbridge_domain::eventing::{EventBus, EventHandler, SubscriptionHandle};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// 以结构化日志记录事件
#[derive(Debug, Default)]
pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    fn handler_name(&self) -> &str {
        "logging"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        match ChatEvent::try_from(event)? {
            ChatEvent::ErrorOccurred(err) => error!(
                event_id = %event.id(),
                correlation_id = event.correlation_id(),
                error_type = %err.error_type,
                error_message = %err.error_message,
                "error occurred"
            ),
            other => info!(
                event_id = %event.id(),
                event_type = other.event_type(),
                correlation_id = event.correlation_id(),
                occurred_at = %event.timestamp(),
                "chat event"
            ),
        }
        Ok(())
    }
}

/// 默认去重窗口：记住最近处理过的事件 ID 数量
pub const DEFAULT_DEDUPE_WINDOW: usize = 10_000;

/// 按 request_id 累计 `request_completed` 中的 token 用量
///
/// 同一事件在重试或重放下可能被投递多次，以事件 ID 去重。
/// 去重只覆盖最近 `dedupe_window` 个事件，更早的 ID 按先进先出淘汰。
#[derive(Debug)]
pub struct TokenUsageHandler {
    by_request: DashMap<String, u64>,
    seen: DashMap<EventId, ()>,
    order: Mutex<VecDeque<EventId>>,
    dedupe_window: usize,
}

impl Default for TokenUsageHandler {
    fn default() -> Self {
        Self::with_dedupe_window(DEFAULT_DEDUPE_WINDOW)
    }
}

impl TokenUsageHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dedupe_window(dedupe_window: usize) -> Self {
        Self {
            by_request: DashMap::new(),
            seen: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            dedupe_window: dedupe_window.max(1),
        }
    }

    /// 当前记住的事件 ID 数量
    pub fn remembered(&self) -> usize {
        self.seen.len()
    }

    /// 记录事件 ID；已见过返回 false
    fn remember(&self, id: EventId) -> anyhow::Result<bool> {
        let mut order = self
            .order
            .lock()
            .map_err(|_| anyhow::anyhow!("token usage dedupe window poisoned"))?;
        if self.seen.insert(id, ()).is_some() {
            return Ok(false);
        }
        order.push_back(id);
        while order.len() > self.dedupe_window {
            if let Some(old) = order.pop_front() {
                self.seen.remove(&old);
            }
        }
        Ok(true)
    }

    pub fn tokens_for(&self, request_id: &str) -> u64 {
        self.by_request.get(request_id).map_or(0, |v| *v)
    }

    pub fn total_tokens(&self) -> u64 {
        self.by_request.iter().map(|e| *e.value()).sum()
    }
}

#[async_trait]
impl EventHandler for TokenUsageHandler {
    fn handler_name(&self) -> &str {
        "token_usage"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let done: RequestCompleted = event.decode()?;
        if !self.remember(event.id())? {
            return Ok(());
        }
        *self.by_request.entry(done.request_id).or_insert(0) += u64::from(done.tokens_used);
        Ok(())
    }
}

/// 启动阶段注册默认订阅者，返回订阅句柄
pub async fn subscribe_defaults(
    bus: &dyn EventBus,
    usage: Arc<TokenUsageHandler>,
) -> DomainResult<Vec<SubscriptionHandle>> {
    let logging = Arc::new(LoggingHandler);
    let mut handles = Vec::new();
    for ty in [
        RequestInitiated::EVENT_TYPE,
        RequestCompleted::EVENT_TYPE,
        ResponseReceived::EVENT_TYPE,
        ErrorOccurred::EVENT_TYPE,
    ] {
        handles.push(bus.subscribe(ty, logging.clone()).await?);
    }
    handles.push(bus.subscribe(RequestCompleted::EVENT_TYPE, usage).await?);
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatbridge_domain::eventing::{EventBusExt, InMemoryEventBus};

    fn completed(request_id: &str, tokens_used: u32) -> Event {
        Event::from_typed(
            &RequestCompleted {
                request_id: request_id.into(),
                tokens_used,
            },
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn token_usage_is_idempotent_per_event() {
        let usage = TokenUsageHandler::new();
        let ev = completed("r1", 30);
        usage.handle(&ev).await.unwrap();
        usage.handle(&ev).await.unwrap();
        usage.handle(&completed("r1", 12)).await.unwrap();
        usage.handle(&completed("r2", 5)).await.unwrap();

        assert_eq!(usage.tokens_for("r1"), 42);
        assert_eq!(usage.tokens_for("r2"), 5);
        assert_eq!(usage.tokens_for("r3"), 0);
        assert_eq!(usage.total_tokens(), 47);
    }

    #[tokio::test]
    async fn token_usage_dedupe_window_is_bounded() {
        let usage = TokenUsageHandler::with_dedupe_window(2);
        let first = completed("r1", 10);
        usage.handle(&first).await.unwrap();
        usage.handle(&completed("r1", 1)).await.unwrap();
        usage.handle(&completed("r1", 1)).await.unwrap();
        assert_eq!(usage.remembered(), 2);
        assert_eq!(usage.tokens_for("r1"), 12);

        // 已被淘汰的 ID 不再去重
        usage.handle(&first).await.unwrap();
        assert_eq!(usage.tokens_for("r1"), 22);
        assert_eq!(usage.remembered(), 2);
    }

    #[tokio::test]
    async fn token_usage_rejects_other_event_types() {
        let usage = TokenUsageHandler::new();
        let ev = Event::builder().event_type("request_initiated").build().unwrap();
        assert!(usage.handle(&ev).await.is_err());
    }

    #[tokio::test]
    async fn logging_rejects_unknown_types() {
        let ev = Event::builder().event_type("mystery").build().unwrap();
        assert!(LoggingHandler.handle(&ev).await.is_err());
        assert!(LoggingHandler.handle(&completed("r1", 1)).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn defaults_wire_into_bus() {
        let bus = InMemoryEventBus::default();
        let usage = Arc::new(TokenUsageHandler::new());
        let handles = subscribe_defaults(&bus, usage.clone()).await.unwrap();
        assert_eq!(handles.len(), 5);
        assert_eq!(bus.subscriber_count(RequestCompleted::EVENT_TYPE).unwrap(), 2);

        bus.publish_typed(
            &RequestCompleted {
                request_id: "r1".into(),
                tokens_used: 50,
            },
            None,
        )
        .await
        .unwrap();
        bus.drain().await;

        assert_eq!(usage.tokens_for("r1"), 50);
        assert_eq!(bus.metrics().succeeded, 2);
    }
}
