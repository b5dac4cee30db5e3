/// 内存事件总线示例
/// 展示 publish -> 订阅者投递 -> 失败重试 -> 死信 -> 重放 的闭环
use anyhow::{Result as AnyResult, anyhow};
use chatbridge_domain::domain_event::{Event, RequestCompleted, RequestInitiated, SchemaRegistry};
use chatbridge_domain::eventing::{
    EventBus, EventBusConfig, EventBusExt, EventHandler, InMemoryDeadLetterSink, InMemoryEventBus,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ============================================================================
// 示例处理器（EventHandler）
// ============================================================================

struct PrintHandler {
    name: &'static str,
}

#[async_trait::async_trait]
impl EventHandler for PrintHandler {
    fn handler_name(&self) -> &str {
        self.name
    }

    async fn handle(&self, event: &Event) -> AnyResult<()> {
        println!(
            "handler={} type={} correlation={} payload={}",
            self.name,
            event.event_type(),
            event.correlation_id(),
            serde_json::Value::Object(event.payload().clone())
        );
        Ok(())
    }
}

/// 前 `fail_first` 次调用失败
struct SometimesFail {
    calls: AtomicUsize,
    fail_first: usize,
}

#[async_trait::async_trait]
impl EventHandler for SometimesFail {
    fn handler_name(&self) -> &str {
        "sometimes_fail"
    }

    async fn handle(&self, event: &Event) -> AnyResult<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.fail_first {
            println!("sometimes_fail: call {n} on {} fails", event.event_type());
            return Err(anyhow!("downstream unavailable (call {n})"));
        }
        println!("sometimes_fail: call {n} on {} ok", event.event_type());
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> AnyResult<()> {
    println!("=== 内存事件总线示例 ===\n");

    let sink = InMemoryDeadLetterSink::new();
    let bus = InMemoryEventBus::builder()
        .config(EventBusConfig {
            max_retries: 3,
            base_backoff_ms: 100,
            ..Default::default()
        })
        .dead_letter_sink(Arc::new(sink.clone()))
        .schemas(SchemaRegistry::chat_events())
        .build()?;

    bus.subscribe("request_initiated", Arc::new(PrintHandler { name: "printer" }))
        .await?;
    bus.subscribe("request_completed", Arc::new(PrintHandler { name: "printer" }))
        .await?;
    bus.subscribe(
        "request_completed",
        Arc::new(SometimesFail {
            calls: AtomicUsize::new(0),
            fail_first: 4,
        }),
    )
    .await?;
    println!("✅ 处理器已订阅");

    bus.publish_typed(
        &RequestInitiated {
            request_id: "r1".into(),
            user_id: "u1".into(),
            prompt: "Tell me a joke".into(),
            max_tokens: Some(64),
        },
        Some("cor-r1".into()),
    )
    .await?;
    bus.publish_typed(
        &RequestCompleted {
            request_id: "r1".into(),
            tokens_used: 42,
        },
        Some("cor-r1".into()),
    )
    .await?;
    println!("✅ 事件已发布（发布方不等待处理器）");

    // 第 1~3 次失败后进入死信
    tokio::time::sleep(Duration::from_secs(1)).await;
    for record in sink.drain() {
        println!(
            "☠️  dead letter: handler={} attempts={} last_error={:?}",
            record.handler,
            record.failure_history.len(),
            record.failure_history.last().map(|f| &f.error)
        );
        // 第 4 次仍失败，第 5 次成功
        bus.redeliver(&record).await?;
    }

    bus.drain().await;
    println!("\n✅ 优雅关闭完成: {:?}", bus.metrics());
    Ok(())
}
