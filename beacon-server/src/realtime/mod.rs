//! Realtime fan-out
//!
//! `hub` delivers envelopes to live subscribers keyed by entity id; `status`
//! turns run state transitions into enriched `pipeline_status_change` events.

pub mod hub;
pub mod status;

pub use hub::{ConnectionId, EventSink, Hub, HubClosed, HubHandle, Subscriber};
pub use status::{RunContextSource, StatusBroadcaster};
