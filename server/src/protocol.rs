//! Wire protocol variants.
//!
//! Both server protocol versions exchange JSON envelopes over a websocket on
//! the server's `http` port; they differ in the endpoint path, how a request
//! is wrapped and which field carries the correlation id. Events
//! are envelopes without a (known) id whose payload names its kind in
//! `typehint`.

use std::sync::Arc;

use serde_json::{Value, json};

use ensime_types::{CallId, ProtocolVersion};

/// An inbound envelope, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Carries a call id; may still be an event if nothing is waiting on it.
    Reply { id: CallId, body: Value },
    /// No call id.
    Event { kind: Option<String>, payload: Value },
}

/// How requests are wrapped and replies recognized for one protocol version.
pub trait WireProtocol: Send + Sync {
    fn version(&self) -> ProtocolVersion;

    /// Websocket endpoint path, without the leading slash.
    fn endpoint(&self) -> &'static str;

    /// Websocket subprotocol to request during the handshake, if any.
    fn subprotocol(&self) -> Option<&'static str> {
        None
    }

    /// Wrap `payload` with the correlation id.
    fn envelope(&self, id: CallId, payload: Value) -> Value;

    /// Classify an inbound envelope.
    fn classify(&self, envelope: &Value) -> Incoming;

    /// Whether sessions speaking this protocol offer debugger commands.
    fn supports_debugger(&self) -> bool;
}

fn event_from(envelope: &Value) -> Incoming {
    let payload = envelope.get("payload").cloned().unwrap_or(Value::Null);
    let kind = typehint(&payload).map(str::to_string);
    Incoming::Event { kind, payload }
}

/// The `typehint` of a payload, which names request, reply and event kinds.
#[must_use]
pub fn typehint(payload: &Value) -> Option<&str> {
    payload.get("typehint").and_then(Value::as_str)
}

fn classify_with_id_field(envelope: &Value, id_field: &str) -> Incoming {
    match envelope.get(id_field).and_then(Value::as_u64) {
        Some(id) => Incoming::Reply {
            id: CallId::new(id),
            body: envelope.get("payload").cloned().unwrap_or(Value::Null),
        },
        None => event_from(envelope),
    }
}

/// Protocol v1 at `/jerky`: `{"callId": n, "req": ...}` out, `{"callId": n, "payload": ...}` back.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtocolV1;

impl WireProtocol for ProtocolV1 {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V1
    }

    fn endpoint(&self) -> &'static str {
        "jerky"
    }

    fn envelope(&self, id: CallId, payload: Value) -> Value {
        json!({ "callId": id.value(), "req": payload })
    }

    fn classify(&self, envelope: &Value) -> Incoming {
        classify_with_id_field(envelope, "callId")
    }

    fn supports_debugger(&self) -> bool {
        false
    }
}

/// Protocol v2 at `/websocket` (subprotocol `jerky`): `{"id": n, "payload": ...}` in both directions.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtocolV2;

impl WireProtocol for ProtocolV2 {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V2
    }

    fn endpoint(&self) -> &'static str {
        "websocket"
    }

    fn subprotocol(&self) -> Option<&'static str> {
        Some("jerky")
    }

    fn envelope(&self, id: CallId, payload: Value) -> Value {
        json!({ "id": id.value(), "payload": payload })
    }

    fn classify(&self, envelope: &Value) -> Incoming {
        classify_with_id_field(envelope, "id")
    }

    fn supports_debugger(&self) -> bool {
        true
    }
}

/// The protocol implementation for `version`.
#[must_use]
pub fn protocol_for(version: ProtocolVersion) -> Arc<dyn WireProtocol> {
    match version {
        ProtocolVersion::V1 => Arc::new(ProtocolV1),
        ProtocolVersion::V2 => Arc::new(ProtocolV2),
    }
}
