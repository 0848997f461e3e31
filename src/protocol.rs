//! Wire Envelope and Message Dispatch
//!
//! Every tier exchanges the same UTF-8 JSON envelope:
//! `{type, payload|content|message, timestamp}`. The `type` field selects a
//! handler from a small closed set; unrecognized types fall through to a
//! generic echo and are never rejected.
//!
//! Dispatch is a pure function from a parsed envelope to the reply envelope,
//! so each handler is testable without a socket.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

/// Closed set of recognized envelope types.
///
/// Anything else maps to [`MessageKind::Unclassified`] and gets generic echo
/// behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Ping,
    Pong,
    Message,
    Echo,
    Heartbeat,
    System,
    Error,
    Unclassified,
}

impl MessageKind {
    /// Classify an envelope `type` string.
    pub fn parse(kind: &str) -> Self {
        match kind {
            "ping" => MessageKind::Ping,
            "pong" => MessageKind::Pong,
            "message" => MessageKind::Message,
            "echo" => MessageKind::Echo,
            "heartbeat" => MessageKind::Heartbeat,
            "system" => MessageKind::System,
            "error" => MessageKind::Error,
            _ => MessageKind::Unclassified,
        }
    }

    /// Label used in metrics and tracing fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::Message => "message",
            MessageKind::Echo => "echo",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::System => "system",
            MessageKind::Error => "error",
            MessageKind::Unclassified => "unclassified",
        }
    }
}

/// ISO-8601 timestamp with millisecond precision.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Compute the reply envelope for an inbound envelope.
///
/// Rules:
/// - `ping` replies `pong` with the original timestamp and a latency
///   (`now - originalTimestamp`, clamped to >= 0)
/// - `message` echoes the envelope back tagged `echo: true`
/// - `echo` and every unclassified type echo the full original envelope
///   under `received`
pub fn dispatch(envelope: &Value, now: DateTime<Utc>) -> Value {
    let kind = envelope
        .get("type")
        .and_then(Value::as_str)
        .map(MessageKind::parse)
        .unwrap_or(MessageKind::Unclassified);

    match kind {
        MessageKind::Ping => pong_reply(envelope, now),
        MessageKind::Message => message_echo(envelope, now),
        _ => received_echo(envelope, now),
    }
}

/// Reply to a `ping` envelope.
///
/// Carries the original timestamp back and a computed latency in
/// milliseconds. An absent or unparsable timestamp yields latency 0.
fn pong_reply(envelope: &Value, now: DateTime<Utc>) -> Value {
    let original = envelope.get("timestamp").cloned().unwrap_or(Value::Null);
    let latency_ms = original
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| {
            now.signed_duration_since(t.with_timezone(&Utc))
                .num_milliseconds()
                .max(0)
        })
        .unwrap_or(0);

    json!({
        "type": "pong",
        "originalTimestamp": original,
        "latency": latency_ms,
        "timestamp": iso_timestamp(now),
    })
}

/// Echo a `message` envelope back to the sender tagged `echo: true`.
fn message_echo(envelope: &Value, now: DateTime<Utc>) -> Value {
    let mut reply = envelope.clone();
    if let Some(fields) = reply.as_object_mut() {
        fields.insert("echo".to_string(), Value::Bool(true));
        fields.insert("timestamp".to_string(), Value::String(iso_timestamp(now)));
    }
    reply
}

/// Generic echo: the full original envelope under `received`.
fn received_echo(envelope: &Value, now: DateTime<Utc>) -> Value {
    json!({
        "type": "echo",
        "received": envelope.clone(),
        "timestamp": iso_timestamp(now),
    })
}

/// Initial envelope announcing endpoint identity on a new socket.
pub fn system_hello(endpoint: &str, connection_id: &str) -> Value {
    json!({
        "type": "system",
        "message": format!("connected to {endpoint}"),
        "connectionId": connection_id,
        "timestamp": iso_timestamp(Utc::now()),
    })
}

/// Initial envelope written on a new server-push stream.
pub fn connected(connection_id: &str) -> Value {
    json!({
        "type": "connected",
        "connectionId": connection_id,
        "timestamp": iso_timestamp(Utc::now()),
    })
}

/// Error envelope surfaced to the offending client only.
pub fn error_envelope(message: &str) -> Value {
    json!({
        "type": "error",
        "message": message,
        "timestamp": iso_timestamp(Utc::now()),
    })
}

/// Application-level keepalive pushed by the per-connection probe timer.
pub fn keepalive_ping() -> Value {
    json!({
        "type": "ping",
        "timestamp": iso_timestamp(Utc::now()),
    })
}

/// Heartbeat envelope written to server-push streams to keep intermediary
/// proxies from timing the stream out.
pub fn heartbeat() -> Value {
    json!({
        "type": "heartbeat",
        "timestamp": iso_timestamp(Utc::now()),
    })
}

/// Acknowledgement envelope for the overlay tier.
pub fn ack(ack_id: &Value) -> Value {
    json!({
        "type": "ack",
        "ackId": ack_id,
        "timestamp": iso_timestamp(Utc::now()),
    })
}

/// Stamp a `timestamp` onto an outbound message if it does not carry one.
///
/// Used by the broadcast entry point, which accepts arbitrary JSON.
pub fn stamp_timestamp(message: &mut Value, now: DateTime<Utc>) {
    if let Some(fields) = message.as_object_mut() {
        fields
            .entry("timestamp".to_string())
            .or_insert_with(|| Value::String(iso_timestamp(now)));
    }
}
