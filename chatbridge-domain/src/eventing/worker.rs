//! 订阅投递任务
//!
//! 每个订阅独占一个长驻任务，按入队顺序逐条投递；同一 (事件, 处理器)
//! 的重试在该任务内串行进行，因此永远不会出现并发的重复尝试。
//!
use super::bus::SubscriptionId;
use super::dead_letter::DeadLetterSink;
use super::delivery::{DeliveryAttempt, RetryPolicy, Transition};
use super::handler::EventHandler;
use super::metrics::BusMetrics;
use crate::domain_event::Event;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// 投递任务共享的运行参数
pub(crate) struct DeliveryContext {
    pub(crate) policy: RetryPolicy,
    pub(crate) handler_timeout: Duration,
    pub(crate) sink: Arc<dyn DeadLetterSink>,
    pub(crate) metrics: Arc<BusMetrics>,
    pub(crate) token: CancellationToken,
}

pub(crate) async fn run(
    ctx: Arc<DeliveryContext>,
    subscription_id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
    mut rx: mpsc::UnboundedReceiver<Arc<Event>>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => break,
            next = rx.recv() => match next {
                Some(event) => event,
                // 所有发送端已释放（取消订阅或排空关闭），积压已处理完毕
                None => break,
            },
        };

        if !deliver(&ctx, subscription_id, handler.as_ref(), event).await {
            break;
        }
    }

    rx.close();
    let mut abandoned = 0u64;
    while rx.try_recv().is_ok() {
        abandoned += 1;
    }
    if abandoned > 0 {
        ctx.metrics.add_abandoned(abandoned);
        warn!(
            subscription = %subscription_id,
            handler = handler.handler_name(),
            abandoned,
            "bus shut down with pending deliveries"
        );
    }
}

/// 投递单个事件直至成功、进入死信或总线关闭；返回 false 表示因关闭而中止
async fn deliver(
    ctx: &DeliveryContext,
    subscription_id: SubscriptionId,
    handler: &dyn EventHandler,
    event: Arc<Event>,
) -> bool {
    let mut attempt = DeliveryAttempt::new(event.clone(), handler.handler_name());

    loop {
        let n = match attempt.begin() {
            Ok(n) => n,
            Err(err) => {
                error!(error = %err, "delivery state machine rejected attempt");
                return true;
            }
        };

        let outcome = invoke(handler, &event, ctx.handler_timeout).await;
        let reason = match outcome {
            Ok(()) => {
                if let Err(err) = attempt.succeed() {
                    error!(error = %err, "delivery state machine rejected success");
                }
                ctx.metrics.incr_succeeded();
                debug!(
                    event_id = %event.id(),
                    event_type = event.event_type(),
                    handler = handler.handler_name(),
                    attempt = n,
                    "event handled"
                );
                return true;
            }
            Err(reason) => reason,
        };

        match attempt.fail(reason.clone(), &ctx.policy) {
            Ok(Transition::Retry { delay }) => {
                ctx.metrics.incr_retried();
                warn!(
                    event_id = %event.id(),
                    event_type = event.event_type(),
                    correlation_id = event.correlation_id(),
                    handler = handler.handler_name(),
                    attempt = n,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "handler failed, retry scheduled"
                );
                tokio::select! {
                    _ = ctx.token.cancelled() => {
                        ctx.metrics.add_abandoned(1);
                        warn!(
                            event_id = %event.id(),
                            handler = handler.handler_name(),
                            "bus shut down while waiting to retry"
                        );
                        return false;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Ok(Transition::Exhausted) => {
                dead_letter(ctx, subscription_id, attempt).await;
                return true;
            }
            Err(err) => {
                error!(error = %err, "delivery state machine rejected failure");
                return true;
            }
        }
    }
}

async fn dead_letter(ctx: &DeliveryContext, subscription_id: SubscriptionId, attempt: DeliveryAttempt) {
    let record = match attempt.into_dead_letter(subscription_id) {
        Ok(record) => record,
        Err(err) => {
            error!(error = %err, "failed to build dead letter record");
            return;
        }
    };

    ctx.metrics.incr_dead_lettered();
    error!(
        event_id = %record.event.id(),
        event_type = record.event.event_type(),
        correlation_id = record.event.correlation_id(),
        handler = %record.handler,
        subscription = %subscription_id,
        attempts = record.failure_history.len(),
        last_error = record.failure_history.last().map(|f| f.error.as_str()).unwrap_or_default(),
        "retries exhausted, event dead-lettered"
    );

    if let Err(err) = ctx.sink.append(record).await {
        ctx.metrics.incr_dead_letter_errors();
        error!(error = %err, subscription = %subscription_id, "failed to append dead letter record");
    }
}

/// 调用处理器：错误、panic 与超时都归为失败
async fn invoke(handler: &dyn EventHandler, event: &Event, timeout: Duration) -> Result<(), String> {
    let call = AssertUnwindSafe(handler.handle(event)).catch_unwind();
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(err))) => Err(format!("{err:#}")),
        Ok(Err(panic)) => Err(format!("handler panicked: {}", panic_message(panic.as_ref()))),
        Err(_) => Err(format!("handler timed out after {}ms", timeout.as_millis())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
