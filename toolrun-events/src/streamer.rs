//! Per-run event fan-out

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use toolrun_config::StreamingConfig;
use toolrun_core::RunId;
use tracing::{debug, trace, warn};

use crate::event::{Event, EventType};
use crate::subscription::Subscription;

/// Tunables for an [`EventStreamer`]
#[derive(Debug, Clone)]
pub struct StreamerOptions {
    /// Idle time after which a subscription yields a keep-alive
    pub keepalive_interval: Duration,
    /// Events buffered per subscriber before it is dropped as lagging
    pub subscriber_queue_capacity: usize,
}

impl Default for StreamerOptions {
    fn default() -> Self {
        Self::from(&StreamingConfig::default())
    }
}

impl From<&StreamingConfig> for StreamerOptions {
    fn from(config: &StreamingConfig) -> Self {
        Self {
            keepalive_interval: config.keepalive_interval,
            subscriber_queue_capacity: config.subscriber_queue_capacity.max(1),
        }
    }
}

/// Fans run events out to subscribers and remembers the latest of each type
///
/// `publish` never waits on a subscriber: each subscription has its own
/// delivery task feeding a bounded queue, so a slow consumer only delays
/// itself. A subscriber that falls a full inbox behind is dropped and its
/// stream ends after the events already buffered. All subscribers of a run
/// observe events in publish order.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EventStreamer {
    inner: Arc<StreamerInner>,
}

pub(crate) struct StreamerInner {
    options: StreamerOptions,
    state: Mutex<StreamerState>,
}

#[derive(Default)]
struct StreamerState {
    sequence: u64,
    next_subscriber_id: u64,
    runs: HashMap<RunId, RunEvents>,
}

#[derive(Default)]
struct RunEvents {
    last: HashMap<EventType, Event>,
    subscribers: HashMap<u64, mpsc::Sender<Event>>,
}

impl RunEvents {
    fn is_idle(&self) -> bool {
        self.last.is_empty() && self.subscribers.is_empty()
    }
}

impl EventStreamer {
    pub fn new(options: StreamerOptions) -> Self {
        Self {
            inner: Arc::new(StreamerInner {
                options,
                state: Mutex::new(StreamerState::default()),
            }),
        }
    }

    pub fn from_config(config: &StreamingConfig) -> Self {
        Self::new(StreamerOptions::from(config))
    }

    pub fn options(&self) -> &StreamerOptions {
        &self.inner.options
    }

    /// Record `data` as the latest `event_type` event of the run and deliver
    /// it to every current subscriber.
    pub fn publish(&self, run_id: &RunId, event_type: EventType, data: JsonValue) -> Event {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        state.sequence += 1;
        let event = Event {
            event_type,
            run_id: run_id.clone(),
            timestamp: Utc::now(),
            sequence: state.sequence,
            data,
        };

        let run = state.runs.entry(run_id.clone()).or_default();
        run.last.insert(event_type, event.clone());
        run.subscribers
            .retain(|subscriber_id, inbox| match inbox.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(run_id = %run_id, subscriber_id, "Subscriber fell behind, dropping it");
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            });

        trace!(
            run_id = %run_id,
            event_type = %event_type,
            subscribers = run.subscribers.len(),
            "Published event"
        );
        event
    }

    /// Subscribe to a run's events.
    ///
    /// With `include_history`, the latest event of each type is replayed
    /// first, in original publish order. Taking the snapshot and registering
    /// the subscriber happen under one lock, so no event is missed or
    /// duplicated between the two. Dropping the subscription unsubscribes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self, run_id: &RunId, include_history: bool) -> Subscription {
        let capacity = self.inner.options.subscriber_queue_capacity;
        let (inbox_tx, inbox_rx) = mpsc::channel(capacity);
        let (queue_tx, queue_rx) = mpsc::channel(capacity);

        let (subscriber_id, history) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;

            state.next_subscriber_id += 1;
            let subscriber_id = state.next_subscriber_id;

            let run = state.runs.entry(run_id.clone()).or_default();
            let mut history: Vec<Event> = if include_history {
                run.last.values().cloned().collect()
            } else {
                Vec::new()
            };
            history.sort_by_key(|event| event.sequence);

            run.subscribers.insert(subscriber_id, inbox_tx);
            (subscriber_id, history)
        };

        debug!(
            run_id = %run_id,
            subscriber_id,
            history = history.len(),
            "Subscriber attached"
        );

        let delivery = tokio::spawn(deliver(inbox_rx, queue_tx));

        Subscription::new(
            run_id.clone(),
            subscriber_id,
            history,
            queue_rx,
            delivery,
            Arc::downgrade(&self.inner),
            self.inner.options.keepalive_interval,
        )
    }

    pub fn last_event(&self, run_id: &RunId, event_type: EventType) -> Option<Event> {
        self.inner
            .state
            .lock()
            .runs
            .get(run_id)
            .and_then(|run| run.last.get(&event_type).cloned())
    }

    pub fn subscriber_count(&self, run_id: &RunId) -> usize {
        self.inner
            .state
            .lock()
            .runs
            .get(run_id)
            .map_or(0, |run| run.subscribers.len())
    }

    /// Forget the retained events of a run. Live subscriptions are unaffected.
    pub fn clear(&self, run_id: &RunId) {
        let mut state = self.inner.state.lock();
        if let Some(run) = state.runs.get_mut(run_id) {
            run.last.clear();
            if run.is_idle() {
                state.runs.remove(run_id);
            }
        }
    }

    /// Number of runs with retained events or live subscribers
    pub fn tracked_runs(&self) -> usize {
        self.inner.state.lock().runs.len()
    }
}

impl Default for EventStreamer {
    fn default() -> Self {
        Self::new(StreamerOptions::default())
    }
}

impl StreamerInner {
    pub(crate) fn unsubscribe(&self, run_id: &RunId, subscriber_id: u64) {
        let mut state = self.state.lock();
        if let Some(run) = state.runs.get_mut(run_id) {
            run.subscribers.remove(&subscriber_id);
            if run.is_idle() {
                state.runs.remove(run_id);
            }
        }
        debug!(run_id = %run_id, subscriber_id, "Subscriber detached");
    }
}

/// Forward events from a subscriber's inbox into its bounded queue
async fn deliver(mut inbox: mpsc::Receiver<Event>, queue: mpsc::Sender<Event>) {
    while let Some(event) = inbox.recv().await {
        if queue.send(event).await.is_err() {
            break;
        }
    }
}
