//! Delivery of named events to individual users.
//!
//! The actual transport (websockets, server-sent events, polling) lives outside of this crate.
//! Everything in here only needs to be able to hand an event over to an [`EventSink`], which
//! delivers it on a best-effort basis.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::types::Identity;

/// The payload of an event, an insertion-ordered JSON object.
pub type Payload = Map<String, Value>;

/// Pushes events to a connected client.
///
/// Delivery is best-effort. Implementations must never fail or block the caller, even when the
/// client has disconnected, as events are emitted from hot paths of background tasks.
pub trait EventSink: Send + Sync + 'static {
    fn send_event(&self, identity: &Identity, event_type: &str, payload: Payload);
}

pub type EventSinkRef = Arc<dyn EventSink>;

/// Serializes `value` into an event [`Payload`].
///
/// Values that do not serialize to a JSON object produce an empty payload.
pub fn to_payload<T: Serialize>(value: &T) -> Payload {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            tracing::error!(value = %other, "Event payload is not an object");
            Payload::new()
        }
        Err(err) => {
            tracing::error!(error = &err as &dyn std::error::Error, "Failed to serialize event");
            Payload::new()
        }
    }
}

/// An [`EventSink`] that only writes events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn send_event(&self, identity: &Identity, event_type: &str, payload: Payload) {
        let payload = Value::Object(payload);
        tracing::debug!(user = %identity, event_type, %payload, "Event");
    }
}

/// An event together with its recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub identity: Identity,
    pub event_type: String,
    pub payload: Payload,
}

/// An [`EventSink`] that forwards events into a channel.
///
/// The transport layer owns the receiving end and routes events to the matching connections.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<Event>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn send_event(&self, identity: &Identity, event_type: &str, payload: Payload) {
        let event = Event {
            identity: identity.clone(),
            event_type: event_type.to_owned(),
            payload,
        };
        if self.sender.send(event).is_err() {
            tracing::trace!(user = %identity, event_type, "Dropping event, no receiver");
        }
    }
}
