use anyhow::{Result as AnyResult, anyhow};
use chatbridge_domain::domain_event::{Event, RequestInitiated};
use chatbridge_domain::eventing::{
    EventBus, EventBusConfig, EventBusExt, EventHandler, InMemoryDeadLetterSink, InMemoryEventBus,
    handler_fn,
};
use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// 记录每次调用；前 `fail_first` 次调用返回错误
struct Recorder {
    name: &'static str,
    fail_first: usize,
    calls: Mutex<Vec<(Instant, Event)>>,
}

impl Recorder {
    fn new(name: &'static str) -> Arc<Self> {
        Self::failing(name, 0)
    }

    fn failing(name: &'static str, fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail_first,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    fn seqs(&self) -> Vec<u64> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, e)| e.payload().get("seq").and_then(Value::as_u64))
            .collect()
    }
}

#[async_trait::async_trait]
impl EventHandler for Recorder {
    fn handler_name(&self) -> &str {
        self.name
    }

    async fn handle(&self, event: &Event) -> AnyResult<()> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((Instant::now(), event.clone()));
            calls.len()
        };
        if n <= self.fail_first {
            return Err(anyhow!("{} failed on call {n}", self.name));
        }
        Ok(())
    }
}

fn config(max_retries: u32, base_backoff_ms: u64) -> EventBusConfig {
    EventBusConfig {
        max_retries,
        base_backoff_ms,
        handler_timeout_ms: 1000,
        jitter_ratio: 0.0,
    }
}

fn bus_with(config: EventBusConfig) -> (InMemoryEventBus, InMemoryDeadLetterSink) {
    let sink = InMemoryDeadLetterSink::new();
    let bus = InMemoryEventBus::builder()
        .config(config)
        .dead_letter_sink(Arc::new(sink.clone()))
        .build()
        .unwrap();
    (bus, sink)
}

fn payload(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
}

fn event(ty: &str, v: Value) -> Event {
    Event::builder().event_type(ty).payload(payload(v)).build().unwrap()
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    // 使用 timeout + 条件轮询，减少固定 sleep 的脆弱性
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn zero_subscribers_is_accepted_and_dropped() -> AnyResult<()> {
    let (bus, sink) = bus_with(config(3, 10));
    let other = Recorder::new("other");
    bus.subscribe("request_completed", other.clone()).await?;

    bus.publish(event("request_initiated", json!({"request_id": "r1"})))
        .await?;
    bus.drain().await;

    assert_eq!(other.count(), 0);
    assert!(sink.is_empty());
    let m = bus.metrics();
    assert_eq!(m.published, 1);
    assert_eq!(m.dropped, 1);
    assert_eq!(m.scheduled, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_subscriber_is_invoked_exactly_once() -> AnyResult<()> {
    let (bus, sink) = bus_with(config(3, 10));
    let handlers: Vec<_> = ["logging", "persistence", "analytics"]
        .into_iter()
        .map(Recorder::new)
        .collect();
    for h in &handlers {
        bus.subscribe("request_initiated", h.clone()).await?;
    }

    let ev = event("request_initiated", json!({"request_id": "r1"}));
    let id = ev.id();
    bus.publish(ev).await?;
    bus.drain().await;

    for h in &handlers {
        let calls = h.calls.lock().unwrap();
        assert_eq!(calls.len(), 1, "{} invoked {} times", h.name, calls.len());
        assert_eq!(calls[0].1.id(), id);
    }
    assert!(sink.is_empty());
    let m = bus.metrics();
    assert_eq!(m.scheduled, 3);
    assert_eq!(m.succeeded, 3);
    assert_eq!(m.retried, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn flaky_handler_succeeds_with_exponential_backoff() -> AnyResult<()> {
    // 失败两次、第三次成功：t≈0, t≈100ms, t≈300ms
    let (bus, sink) = bus_with(config(3, 100));
    let flaky = Recorder::failing("flaky", 2);
    bus.subscribe("RequestInitiated", flaky.clone()).await?;

    bus.publish(event("RequestInitiated", json!({"request_id": "r1"})))
        .await?;
    bus.drain().await;

    let times = flaky.times();
    assert_eq!(times.len(), 3);
    let first_gap = times[1] - times[0];
    let second_gap = times[2] - times[1];
    assert!(first_gap >= Duration::from_millis(100) && first_gap < Duration::from_millis(150));
    assert!(second_gap >= Duration::from_millis(200) && second_gap < Duration::from_millis(250));

    assert!(sink.is_empty());
    let m = bus.metrics();
    assert_eq!(m.succeeded, 1);
    assert_eq!(m.retried, 2);
    assert_eq!(m.dead_lettered, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn always_failing_handler_is_dead_lettered() -> AnyResult<()> {
    let (bus, sink) = bus_with(config(3, 50));
    let broken = Recorder::failing("broken", usize::MAX);
    let healthy = Recorder::new("healthy");
    let handle = bus.subscribe("request_completed", broken.clone()).await?;
    bus.subscribe("request_completed", healthy.clone()).await?;

    let ev = event(
        "request_completed",
        json!({"request_id": "r9", "tokens_used": 12}),
    );
    let id = ev.id();
    bus.publish(ev).await?;
    bus.drain().await;

    assert_eq!(broken.count(), 3);
    assert_eq!(healthy.count(), 1);

    let records = sink.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.event.id(), id);
    assert_eq!(record.handler, "broken");
    assert_eq!(record.subscription_id, handle.id());
    assert_eq!(record.failure_history.len(), 3);
    assert!(record.failure_history[2].error.contains("failed on call 3"));
    assert!(record.failure_history.windows(2).all(|w| w[0].at <= w[1].at));
    assert_eq!(record.final_timestamp, record.failure_history[2].at);
    assert_eq!(bus.metrics().dead_lettered, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn events_from_one_publisher_arrive_in_order() -> AnyResult<()> {
    let (bus, _sink) = bus_with(config(3, 1));
    // 第一次调用失败，重试期间后续事件不得越过
    let ordered = Recorder::failing("ordered", 1);
    bus.subscribe("tick", ordered.clone()).await?;

    for seq in 0..50u64 {
        bus.publish(event("tick", json!({ "seq": seq }))).await?;
    }
    bus.drain().await;

    let seqs = ordered.seqs();
    let mut expected: Vec<u64> = vec![0];
    expected.extend(0..50);
    assert_eq!(seqs, expected);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unsubscribe_does_not_cancel_running_delivery() -> AnyResult<()> {
    let (bus, sink) = bus_with(config(3, 10));
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let completed = Arc::new(AtomicUsize::new(0));

    let handler = {
        let started = started.clone();
        let release = release.clone();
        let completed = completed.clone();
        handler_fn("slow", move |_event| {
            let started = started.clone();
            let release = release.clone();
            let completed = completed.clone();
            async move {
                started.notify_one();
                release.notified().await;
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    };
    let handle = bus.subscribe("response_received", handler).await?;

    bus.publish(event("response_received", json!({"tokens_used": 5})))
        .await?;
    started.notified().await;

    assert!(bus.unsubscribe(&handle).await?);
    bus.publish(event("response_received", json!({"tokens_used": 6})))
        .await?;
    release.notify_one();
    bus.drain().await;

    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert!(sink.is_empty());
    assert_eq!(bus.metrics().dropped, 1);
    Ok(())
}

#[tokio::test]
async fn late_subscribers_do_not_receive_earlier_events() -> AnyResult<()> {
    let (bus, _sink) = bus_with(config(3, 10));
    let early = Recorder::new("early");
    bus.subscribe("session_closed", early.clone()).await?;

    bus.publish(event("session_closed", json!({"session_id": "s1"})))
        .await?;
    let late = Recorder::new("late");
    bus.subscribe("session_closed", late.clone()).await?;
    bus.drain().await;

    assert_eq!(early.count(), 1);
    assert_eq!(late.count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn handler_timeout_counts_as_failure() -> AnyResult<()> {
    let (bus, sink) = bus_with(EventBusConfig {
        max_retries: 2,
        base_backoff_ms: 10,
        handler_timeout_ms: 50,
        jitter_ratio: 0.0,
    });
    let handler = handler_fn("stuck", |_event| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    });
    bus.subscribe("request_initiated", handler).await?;

    bus.publish(event("request_initiated", json!({"request_id": "r1"})))
        .await?;
    bus.drain().await;

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].failure_history.len(), 2);
    assert!(
        records[0]
            .failure_history
            .iter()
            .all(|f| f.error.contains("timed out after 50ms"))
    );
    Ok(())
}

#[tokio::test]
async fn panicking_handler_is_isolated() -> AnyResult<()> {
    let (bus, sink) = bus_with(config(2, 1));
    let panicky = handler_fn("panicky", |_event| async { panic!("kaboom") });
    let healthy = Recorder::new("healthy");
    bus.subscribe("error_occurred", panicky).await?;
    bus.subscribe("error_occurred", healthy.clone()).await?;

    let res = bus
        .publish(event(
            "error_occurred",
            json!({"error_type": "ValueError", "error_message": "bad"}),
        ))
        .await;
    assert!(res.is_ok());
    bus.drain().await;

    assert_eq!(healthy.count(), 1);
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].handler, "panicky");
    assert!(records[0].failure_history[0].error.contains("kaboom"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_abandons_pending_retries() -> AnyResult<()> {
    let (bus, sink) = bus_with(config(3, 10_000));
    let broken = Recorder::failing("broken", usize::MAX);
    bus.subscribe("request_initiated", broken.clone()).await?;

    bus.publish(event("request_initiated", json!({"request_id": "r1"})))
        .await?;
    bus.publish(event("request_initiated", json!({"request_id": "r2"})))
        .await?;
    wait_until(|| bus.metrics().retried == 1).await;

    bus.shutdown();
    bus.drain().await;

    assert_eq!(broken.count(), 1);
    assert!(sink.is_empty());
    assert_eq!(bus.metrics().abandoned, 2);
    assert!(
        bus.publish(event("request_initiated", json!({"request_id": "r3"})))
            .await
            .is_err()
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dead_letter_can_be_redelivered() -> AnyResult<()> {
    let (bus, sink) = bus_with(config(2, 1));
    // 前两次失败进入死信，重放时第三次调用成功
    let recovering = Recorder::failing("recovering", 2);
    bus.subscribe("request_completed", recovering.clone()).await?;

    bus.publish(event(
        "request_completed",
        json!({"request_id": "r1", "tokens_used": 1}),
    ))
    .await?;
    wait_until(|| sink.len() == 1).await;

    let record = sink.drain().remove(0);
    assert!(bus.redeliver(&record).await?);
    wait_until(|| bus.metrics().succeeded == 1).await;
    bus.drain().await;

    assert_eq!(recovering.count(), 3);
    let calls = recovering.calls.lock().unwrap();
    assert_eq!(calls[2].1.id(), record.event.id());
    assert!(sink.is_empty());
    Ok(())
}

#[tokio::test]
async fn emit_and_typed_publish_share_correlation() -> AnyResult<()> {
    let (bus, _sink) = bus_with(config(3, 10));
    let recorder = Recorder::new("audit");
    bus.subscribe("request_initiated", recorder.clone()).await?;

    let typed_id = bus
        .publish_typed(
            &RequestInitiated {
                request_id: "r1".into(),
                user_id: "u1".into(),
                prompt: "hi".into(),
                max_tokens: None,
            },
            Some("cor-1".into()),
        )
        .await?;
    let raw_id = bus
        .emit(
            "request_initiated",
            payload(json!({"request_id": "r2"})),
            Some("cor-1".into()),
        )
        .await?;
    bus.drain().await;

    let calls = recorder.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].1.id(), typed_id);
    assert_eq!(calls[1].1.id(), raw_id);
    assert!(calls.iter().all(|(_, e)| e.correlation_id() == "cor-1"));

    let err = bus.emit("  ", Map::new(), None).await.unwrap_err();
    assert!(err.to_string().contains("event_type"));
    Ok(())
}
