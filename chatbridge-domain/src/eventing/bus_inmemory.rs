//! 内存版事件总线（InMemoryEventBus）
//!
//! 满足 `EventBus` 协议的进程内实现：
//! - `publish`：校验事件后投入每个订阅者的专属队列，立即返回；
//! - `subscribe`：登记处理器并启动其投递任务，保证单订阅者 FIFO；
//! - 失败按 `EventBusConfig` 重试，耗尽后写入 `DeadLetterSink`；
//! - `drain` 优雅排空，`shutdown` 立即停止等待中的重试。
//!
//! 注意：需在 tokio 运行时内调用 `subscribe`。

use super::bus::{EventBus, SubscriptionHandle};
use super::config::EventBusConfig;
use super::dead_letter::{DeadLetterRecord, DeadLetterSink, InMemoryDeadLetterSink};
use super::handler::EventHandler;
use super::metrics::{BusMetrics, MetricsSnapshot};
use super::registry::{Subscription, SubscriptionRegistry};
use super::worker::{self, DeliveryContext};
use crate::domain_event::{Event, SchemaRegistry};
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use bon::bon;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// 简单的内存事件总线实现
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<Inner>,
}

struct Inner {
    config: EventBusConfig,
    registry: SubscriptionRegistry,
    schemas: SchemaRegistry,
    delivery: Arc<DeliveryContext>,
    tracker: TaskTracker,
    accepting: AtomicBool,
}

#[bon]
impl InMemoryEventBus {
    /// 未指定死信存储时使用 `InMemoryDeadLetterSink`；配置非法时返回 `DomainError::Config`
    #[builder]
    pub fn new(
        #[builder(default)] config: EventBusConfig,
        dead_letter_sink: Option<Arc<dyn DeadLetterSink>>,
        #[builder(default)] schemas: SchemaRegistry,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, dead_letter_sink, schemas))
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::assemble(EventBusConfig::default(), None, SchemaRegistry::default())
    }
}

impl InMemoryEventBus {
    fn assemble(
        config: EventBusConfig,
        dead_letter_sink: Option<Arc<dyn DeadLetterSink>>,
        schemas: SchemaRegistry,
    ) -> Self {
        let sink =
            dead_letter_sink.unwrap_or_else(|| Arc::new(InMemoryDeadLetterSink::new()));
        let delivery = Arc::new(DeliveryContext {
            policy: config.retry_policy(),
            handler_timeout: config.handler_timeout(),
            sink,
            metrics: Arc::new(BusMetrics::default()),
            token: CancellationToken::new(),
        });

        Self {
            inner: Arc::new(Inner {
                config,
                registry: SubscriptionRegistry::default(),
                schemas,
                delivery,
                tracker: TaskTracker::new(),
                accepting: AtomicBool::new(true),
            }),
        }
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    pub fn dead_letter_sink(&self) -> Arc<dyn DeadLetterSink> {
        self.inner.delivery.sink.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.delivery.metrics.snapshot()
    }

    pub fn subscriber_count(&self, event_type: &str) -> Result<usize> {
        self.inner.registry.count(event_type)
    }

    pub fn is_closed(&self) -> bool {
        !self.inner.accepting.load(Ordering::Acquire)
    }

    /// 将死信记录中的事件重新投递给原订阅（仅当该订阅仍然存在）
    pub async fn redeliver(&self, record: &DeadLetterRecord) -> Result<bool> {
        self.ensure_open()?;
        let Some(subscription) = self.inner.registry.find(record.subscription_id)? else {
            debug!(subscription = %record.subscription_id, "subscription gone, redelivery skipped");
            return Ok(false);
        };

        let event = Arc::new(record.event.clone());
        if subscription.sender.send(event).is_err() {
            return Ok(false);
        }
        self.inner.delivery.metrics.incr_scheduled();
        info!(
            event_id = %record.event.id(),
            handler = %record.handler,
            subscription = %record.subscription_id,
            "dead letter redelivered"
        );
        Ok(true)
    }

    /// 停止受理新事件与订阅，投递完全部已安排的事件后返回
    pub async fn drain(&self) {
        self.close();
        self.inner.tracker.wait().await;
    }

    /// 停止受理并取消等待中的重试；正在执行的处理器调用不会被打断，
    /// 未开始的积压投递被放弃。可随后调用 `drain` 等待任务退出
    pub fn shutdown(&self) {
        self.close();
        self.inner.delivery.token.cancel();
    }

    fn close(&self) {
        if self.inner.accepting.swap(false, Ordering::AcqRel) {
            match self.inner.registry.clear() {
                Ok(n) => info!(subscriptions = n, "event bus closed"),
                Err(err) => warn!(error = %err, "failed to clear subscriptions on close"),
            }
            self.inner.tracker.close();
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DomainError::event_bus("event bus is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        self.ensure_open()?;
        if event.event_type().trim().is_empty() {
            return Err(DomainError::invalid_event("event_type must not be empty"));
        }
        self.inner.schemas.validate(&event)?;

        let metrics = &self.inner.delivery.metrics;
        metrics.incr_published();

        let subscriptions = self.inner.registry.matching(event.event_type())?;
        if subscriptions.is_empty() {
            metrics.incr_dropped();
            debug!(
                event_id = %event.id(),
                event_type = event.event_type(),
                "no subscribers, event dropped"
            );
            return Ok(());
        }

        let event = Arc::new(event);
        for subscription in &subscriptions {
            if subscription.sender.send(event.clone()).is_err() {
                warn!(
                    event_id = %event.id(),
                    subscription = %subscription.id,
                    "subscription worker gone, delivery skipped"
                );
                continue;
            }
            metrics.incr_scheduled();
        }

        debug!(
            event_id = %event.id(),
            event_type = event.event_type(),
            correlation_id = event.correlation_id(),
            subscribers = subscriptions.len(),
            "event published"
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionHandle> {
        self.ensure_open()?;
        let event_type = event_type.trim();
        if event_type.is_empty() {
            return Err(DomainError::invalid_event("event_type must not be empty"));
        }

        let (sender, rx) = mpsc::unbounded_channel();
        let subscription = Subscription {
            id: self.inner.registry.next_id(),
            event_type: event_type.to_string(),
            handler: handler.clone(),
            sender,
        };
        let handle = subscription.handle();

        self.inner.registry.insert(subscription)?;
        self.inner.tracker.spawn(worker::run(
            self.inner.delivery.clone(),
            handle.id(),
            handler,
            rx,
        ));

        debug!(
            subscription = %handle.id(),
            event_type = handle.event_type(),
            handler = handle.handler(),
            "handler subscribed"
        );
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<bool> {
        // 释放发送端后，投递任务处理完已入队事件即退出
        let removed = self.inner.registry.remove(handle)?.is_some();
        if removed {
            debug!(subscription = %handle.id(), handler = handle.handler(), "handler unsubscribed");
        }
        Ok(removed)
    }
}
