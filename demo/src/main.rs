use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chatbridge_application::{AppContext, EventPublisher, TokenUsageHandler, subscribe_defaults};
use chatbridge_domain::domain_event::{
    ChatEvent, ErrorOccurred, Event, RequestCompleted, RequestInitiated, ResponseReceived,
    SchemaRegistry, TypedEvent,
};
use chatbridge_domain::eventing::{
    EventBus, EventBusConfig, EventHandler, InMemoryEventBus, JsonLinesDeadLetterSink,
};
use serde_json::{Map, json};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEAD_LETTER_PATH_ENV: &str = "CHATBRIDGE_DEAD_LETTER_PATH";

/// 模拟一个始终不可用的通知下游
struct NotificationHandler;

#[async_trait]
impl EventHandler for NotificationHandler {
    fn handler_name(&self) -> &str {
        "notification"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        Err(anyhow!(
            "push gateway unreachable for {}",
            event.correlation_id()
        ))
    }
}

/// “提交请求”用例：发布请求发起、响应、完成三个事件，不等待下游处理
async fn submit_request(
    publisher: &EventPublisher,
    ctx: &AppContext,
    request_id: &str,
    prompt: &str,
) -> Result<()> {
    publisher
        .publish(
            ctx,
            &RequestInitiated {
                request_id: request_id.into(),
                user_id: ctx.actor_id.clone().unwrap_or_default(),
                prompt: prompt.into(),
                max_tokens: Some(256),
            },
        )
        .await?;

    let tokens_used = prompt.split_whitespace().count() as u32 * 7;
    publisher
        .publish(
            ctx,
            &ResponseReceived {
                request_id: Some(request_id.into()),
                tokens_used,
                finish_reason: Some("stop".into()),
            },
        )
        .await?;
    publisher
        .publish(
            ctx,
            &RequestCompleted {
                request_id: request_id.into(),
                tokens_used,
            },
        )
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("chatbridge_domain=debug".parse()?)
        .add_directive("chatbridge_application=info".parse()?);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = EventBusConfig::from_env()?;
    let dead_letter_path =
        std::env::var(DEAD_LETTER_PATH_ENV).unwrap_or_else(|_| "dead_letters.jsonl".to_string());
    let sink = Arc::new(JsonLinesDeadLetterSink::open(&dead_letter_path).await?);
    info!(?config, %dead_letter_path, "starting event bus");

    let bus = InMemoryEventBus::builder()
        .config(config)
        .dead_letter_sink(sink)
        .schemas(SchemaRegistry::chat_events())
        .build()?;

    let usage = Arc::new(TokenUsageHandler::new());
    subscribe_defaults(&bus, usage.clone()).await?;
    bus.subscribe(RequestCompleted::EVENT_TYPE, Arc::new(NotificationHandler))
        .await?;

    let publisher = EventPublisher::new(Arc::new(bus.clone()));
    let ctx = AppContext::default()
        .with_correlation_id("cor-demo-1")
        .with_actor_id("u-1");

    submit_request(&publisher, &ctx, "r1", "Explain the borrow checker briefly").await?;
    submit_request(&publisher, &ctx, "r2", "Write a haiku about tokio").await?;

    let mut error_ctx = Map::new();
    error_ctx.insert("request_id".into(), json!("r3"));
    let err = "not a number".parse::<u32>().unwrap_err();
    publisher
        .publish_chat(&ctx, ChatEvent::ErrorOccurred(ErrorOccurred::from_error(&err, error_ctx)))
        .await?;

    bus.drain().await;

    let dead_letters = JsonLinesDeadLetterSink::read_all(&dead_letter_path).await?;
    info!(
        metrics = ?bus.metrics(),
        total_tokens = usage.total_tokens(),
        dead_letters = dead_letters.len(),
        "event bus drained"
    );
    Ok(())
}
