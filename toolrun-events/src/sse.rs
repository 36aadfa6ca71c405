//! Server-Sent Events framing
//!
//! Frames follow the SSE wire format: an optional `event:` line, one
//! `data:` line per payload line, and a terminating blank line.

use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value as JsonValue};

use crate::event::{Event, StreamItem};
use crate::subscription::Subscription;

/// Comment frame sent when a stream has been idle
pub const KEEPALIVE_FRAME: &str = ": keepalive\n\n";

/// Render one SSE frame
pub fn format_sse(event: Option<&str>, data: &str) -> String {
    let mut frame = String::with_capacity(data.len() + 16);
    if let Some(event) = event {
        frame.push_str("event: ");
        frame.push_str(event);
        frame.push('\n');
    }
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

/// Render a JSON payload as one SSE frame
pub fn format_sse_json(event: Option<&str>, data: &JsonValue) -> String {
    format_sse(event, &data.to_string())
}

/// First frame of every stream
pub fn connected_frame() -> String {
    format_sse_json(None, &json!({"status": "connected"}))
}

/// Frame for a published event, named after its type
pub fn event_frame(event: &Event) -> String {
    let payload = serde_json::to_value(event).unwrap_or(JsonValue::Null);
    format_sse_json(Some(event.event_type.as_str()), &payload)
}

/// Frame for any subscription item
pub fn item_frame(item: &StreamItem) -> String {
    match item {
        StreamItem::Event(event) => event_frame(event),
        StreamItem::KeepAlive => KEEPALIVE_FRAME.to_string(),
    }
}

/// Render a subscription as SSE frames.
///
/// Starts with the connected frame and ends right after the first terminal
/// `status` event, dropping the subscription.
pub fn sse_frames(subscription: Subscription) -> impl Stream<Item = String> + Send {
    let body = stream::unfold(Some(subscription), |state| async move {
        let mut subscription = state?;
        let item = subscription.next().await?;
        let frame = item_frame(&item);
        let finished = item.as_event().is_some_and(Event::is_terminal);
        Some((frame, (!finished).then_some(subscription)))
    });

    stream::once(async { connected_frame() }).chain(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_single_line() {
        assert_eq!(format_sse(None, "hello"), "data: hello\n\n");
        assert_eq!(
            format_sse(Some("status"), "{}"),
            "event: status\ndata: {}\n\n"
        );
    }

    #[test]
    fn test_format_multi_line() {
        assert_eq!(format_sse(None, "a\nb"), "data: a\ndata: b\n\n");
    }

    #[test]
    fn test_connected_frame() {
        assert_eq!(connected_frame(), "data: {\"status\":\"connected\"}\n\n");
    }
}
