//! Event streaming for tool runs
//!
//! Every state change of a run is published to the [`EventStreamer`], which
//! retains the most recent event of each [`EventType`] per run and fans new
//! events out to live [`Subscription`]s. The [`sse`] module renders a
//! subscription as Server-Sent Events frames for the HTTP transport.

pub mod event;
pub mod sse;
pub mod streamer;
pub mod subscription;

pub use event::{Event, EventType, StreamItem};
pub use streamer::{EventStreamer, StreamerOptions};
pub use subscription::Subscription;
