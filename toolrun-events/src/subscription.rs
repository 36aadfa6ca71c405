//! Subscriber side of the event streamer

use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use toolrun_core::RunId;

use crate::event::{Event, StreamItem};
use crate::streamer::StreamerInner;

/// Live stream of one run's events
///
/// Yields replayed history first, then new events as they are published.
/// A [`StreamItem::KeepAlive`] is produced whenever nothing arrives for the
/// keep-alive interval. The stream ends when the streamer is dropped or
/// when the subscriber lagged too far behind and was dropped by it.
pub struct Subscription {
    run_id: RunId,
    subscriber_id: u64,
    history: VecDeque<Event>,
    receiver: mpsc::Receiver<Event>,
    delivery: JoinHandle<()>,
    streamer: Weak<StreamerInner>,
    keepalive_interval: Duration,
    keepalive: Pin<Box<Sleep>>,
}

impl Subscription {
    pub(crate) fn new(
        run_id: RunId,
        subscriber_id: u64,
        history: Vec<Event>,
        receiver: mpsc::Receiver<Event>,
        delivery: JoinHandle<()>,
        streamer: Weak<StreamerInner>,
        keepalive_interval: Duration,
    ) -> Self {
        Self {
            run_id,
            subscriber_id,
            history: history.into(),
            receiver,
            delivery,
            streamer,
            keepalive_interval,
            keepalive: Box::pin(tokio::time::sleep(keepalive_interval)),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Next event, skipping keep-alives
    pub async fn next_event(&mut self) -> Option<Event> {
        while let Some(item) = self.next().await {
            if let StreamItem::Event(event) = item {
                return Some(event);
            }
        }
        None
    }

    fn reset_keepalive(&mut self) {
        let deadline = Instant::now() + self.keepalive_interval;
        self.keepalive.as_mut().reset(deadline);
    }
}

impl Stream for Subscription {
    type Item = StreamItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(event) = this.history.pop_front() {
            this.reset_keepalive();
            return Poll::Ready(Some(StreamItem::Event(event)));
        }

        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                this.reset_keepalive();
                return Poll::Ready(Some(StreamItem::Event(event)));
            }
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => {}
        }

        match this.keepalive.as_mut().poll(cx) {
            Poll::Ready(()) => {
                this.reset_keepalive();
                Poll::Ready(Some(StreamItem::KeepAlive))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.delivery.abort();
        if let Some(streamer) = self.streamer.upgrade() {
            streamer.unsubscribe(&self.run_id, self.subscriber_id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("run_id", &self.run_id)
            .field("subscriber_id", &self.subscriber_id)
            .field("pending_history", &self.history.len())
            .finish()
    }
}
