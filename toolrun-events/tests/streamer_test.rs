//! Event streamer behaviour under concurrent publishers and subscribers

use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use toolrun_core::RunId;
use toolrun_events::sse::{sse_frames, KEEPALIVE_FRAME};
use toolrun_events::{EventStreamer, EventType, StreamItem, StreamerOptions};

const CAPACITY: usize = 4;

fn streamer() -> EventStreamer {
    streamer_with_capacity(CAPACITY)
}

fn streamer_with_capacity(capacity: usize) -> EventStreamer {
    EventStreamer::new(StreamerOptions {
        keepalive_interval: Duration::from_secs(30),
        subscriber_queue_capacity: capacity,
    })
}

#[tokio::test]
async fn test_subscribers_observe_identical_order() {
    let streamer = streamer_with_capacity(64);
    let run = RunId::from("run-1");

    let mut first = streamer.subscribe(&run, false);
    let mut second = streamer.subscribe(&run, false);
    assert_eq!(streamer.subscriber_count(&run), 2);

    let publisher = {
        let streamer = streamer.clone();
        let run = run.clone();
        tokio::spawn(async move {
            for i in 0..50 {
                let event_type = if i % 2 == 0 { EventType::Log } else { EventType::Progress };
                streamer.publish(&run, event_type, json!({ "i": i }));
                if i % 10 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    let mut seen_first = Vec::new();
    let mut seen_second = Vec::new();
    for _ in 0..50 {
        seen_first.push(first.next_event().await.unwrap().sequence);
        seen_second.push(second.next_event().await.unwrap().sequence);
    }
    publisher.await.unwrap();

    assert_eq!(seen_first, seen_second);
    assert!(seen_first.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_slow_subscriber_does_not_block_publisher() {
    let streamer = streamer();
    let run = RunId::from("run-1");
    let mut slow = streamer.subscribe(&run, false);
    let mut fast = streamer.subscribe(&run, false);

    for i in 0..CAPACITY {
        streamer.publish(&run, EventType::Log, json!({ "i": i }));
        assert_eq!(fast.next_event().await.unwrap().data["i"], i);
    }

    // Nobody reads the slow subscriber, yet it still holds everything so far
    for i in 0..CAPACITY {
        assert_eq!(slow.next_event().await.unwrap().data["i"], i);
    }
    assert_eq!(streamer.subscriber_count(&run), 2);
}

#[tokio::test]
async fn test_stalled_subscriber_buffer_stays_bounded() {
    let streamer = streamer();
    let run = RunId::from("run-1");
    let mut stalled = streamer.subscribe(&run, false);

    // Far more than the queue capacity, with nobody reading
    for i in 0..10_000 {
        streamer.publish(&run, EventType::Log, json!({ "i": i }));
    }
    assert_eq!(streamer.subscriber_count(&run), 0);

    let drained = tokio::time::timeout(Duration::from_secs(1), async {
        let mut seen = Vec::new();
        while let Some(event) = stalled.next_event().await {
            seen.push(event.data["i"].as_u64().unwrap());
        }
        seen
    })
    .await
    .unwrap();

    assert!(!drained.is_empty());
    assert!(drained.len() <= 2 * CAPACITY + 1);
    let expected: Vec<u64> = (0..drained.len() as u64).collect();
    assert_eq!(drained, expected);

    // The run itself is unaffected; a new subscriber starts from history
    let mut fresh = streamer.subscribe(&run, true);
    assert_eq!(fresh.next_event().await.unwrap().data["i"], 9_999);
}

#[tokio::test]
async fn test_late_subscriber_receives_history_first() {
    let streamer = streamer();
    let run = RunId::from("run-1");

    streamer.publish(&run, EventType::Status, json!({"status": "queued"}));
    streamer.publish(&run, EventType::Status, json!({"status": "running"}));
    streamer.publish(&run, EventType::Log, json!({"message": "working"}));
    streamer.publish(&run, EventType::Result, json!({"result": {"x": 1}}));
    streamer.publish(&run, EventType::Status, json!({"status": "completed"}));

    let mut late = streamer.subscribe(&run, true);
    let replayed: Vec<_> = [
        late.next_event().await.unwrap(),
        late.next_event().await.unwrap(),
        late.next_event().await.unwrap(),
    ]
    .into_iter()
    .map(|e| e.event_type)
    .collect();
    assert_eq!(replayed, vec![EventType::Log, EventType::Result, EventType::Status]);

    streamer.publish(&run, EventType::Log, json!({"message": "after"}));
    let next = late.next_event().await.unwrap();
    assert_eq!(next.data["message"], "after");
}

#[tokio::test]
async fn test_terminal_status_replayed_to_late_joiner() {
    let streamer = streamer();
    let run = RunId::from("done");
    streamer.publish(&run, EventType::Status, json!({"status": "completed"}));

    let mut late = streamer.subscribe(&run, true);
    let first = late.next_event().await.unwrap();
    assert!(first.is_terminal());
}

#[tokio::test]
async fn test_subscribe_without_history() {
    let streamer = streamer();
    let run = RunId::from("run-1");
    streamer.publish(&run, EventType::Status, json!({"status": "running"}));

    let mut live = streamer.subscribe(&run, false);
    streamer.publish(&run, EventType::Progress, json!({"progress": 10.0}));
    let event = live.next_event().await.unwrap();
    assert_eq!(event.event_type, EventType::Progress);
}

#[tokio::test]
async fn test_last_event_and_clear() {
    let streamer = streamer();
    let run = RunId::from("run-1");
    streamer.publish(&run, EventType::Progress, json!({"progress": 10.0}));
    streamer.publish(&run, EventType::Progress, json!({"progress": 20.0}));

    let last = streamer.last_event(&run, EventType::Progress).unwrap();
    assert_eq!(last.data["progress"], 20.0);
    assert!(streamer.last_event(&run, EventType::Result).is_none());

    streamer.clear(&run);
    assert!(streamer.last_event(&run, EventType::Progress).is_none());
    assert_eq!(streamer.tracked_runs(), 0);
}

#[tokio::test]
async fn test_drop_unsubscribes() {
    let streamer = streamer();
    let run = RunId::from("run-1");
    let subscription = streamer.subscribe(&run, true);
    assert_eq!(streamer.subscriber_count(&run), 1);

    drop(subscription);
    assert_eq!(streamer.subscriber_count(&run), 0);
    assert_eq!(streamer.tracked_runs(), 0);

    // Publishing with nobody listening still records history
    streamer.publish(&run, EventType::Log, json!({}));
    assert!(streamer.last_event(&run, EventType::Log).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_when_idle() {
    let streamer = EventStreamer::new(StreamerOptions {
        keepalive_interval: Duration::from_secs(30),
        subscriber_queue_capacity: 8,
    });
    let run = RunId::from("quiet");
    let mut subscription = streamer.subscribe(&run, false);

    let item = subscription.next().await.unwrap();
    assert_eq!(item, StreamItem::KeepAlive);

    streamer.publish(&run, EventType::Log, json!({"message": "hi"}));
    let item = subscription.next().await.unwrap();
    assert!(matches!(item, StreamItem::Event(_)));
}

#[tokio::test]
async fn test_stream_ends_when_streamer_dropped() {
    let streamer = streamer();
    let run = RunId::from("run-1");
    let mut subscription = streamer.subscribe(&run, false);
    drop(streamer);
    assert!(subscription.next().await.is_none());
}

#[tokio::test]
async fn test_sse_frames_end_after_terminal_status() {
    let streamer = streamer();
    let run = RunId::from("run-1");
    streamer.publish(&run, EventType::Status, json!({"status": "running"}));

    let frames = sse_frames(streamer.subscribe(&run, true));
    tokio::pin!(frames);

    assert_eq!(
        frames.next().await.unwrap(),
        "data: {\"status\":\"connected\"}\n\n"
    );
    let running = frames.next().await.unwrap();
    assert!(running.starts_with("event: status\ndata: "));
    assert!(running.contains("\"running\""));

    streamer.publish(&run, EventType::Status, json!({"status": "failed"}));
    let failed = frames.next().await.unwrap();
    assert!(failed.contains("\"failed\""));
    assert!(frames.next().await.is_none());
    assert_eq!(streamer.subscriber_count(&run), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sse_keepalive_frame() {
    let streamer = streamer();
    let frames = sse_frames(streamer.subscribe(&RunId::from("idle"), false));
    tokio::pin!(frames);

    frames.next().await.unwrap();
    assert_eq!(frames.next().await.unwrap(), KEEPALIVE_FRAME);
}

#[tokio::test]
async fn test_nothing_pending_before_publish() {
    let streamer = streamer();
    let run = RunId::from("run-1");
    let mut subscription = streamer.subscribe(&run, true);

    {
        let mut next = tokio_test::task::spawn(subscription.next());
        tokio_test::assert_pending!(next.poll());
    }

    streamer.publish(&run, EventType::Error, json!({"error": "boom"}));
    let event = subscription.next_event().await.unwrap();
    assert_eq!(event.event_type, EventType::Error);
}
