//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and manages the connection lifecycle
//! for the persistent-socket tier: initial system envelope, per-connection
//! keepalive timer, inbound dispatch, and teardown.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::hub::SocketHub;
use crate::metrics as names;
use crate::protocol::{self, MessageKind};
use crate::registry::Frame;

/// WebSocket upgrade handler
///
/// This is the entry point for persistent-socket connections. The hub for
/// the mount path is captured by the route closure, so several endpoints
/// can coexist with isolated registries.
pub async fn websocket_handler(ws: WebSocketUpgrade, hub: Arc<SocketHub>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, hub: Arc<SocketHub>) {
    let (mut sender, mut receiver) = socket.split();

    // Channel the registry entry exclusively owns for pushes to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

    let connection_id = match hub.register(tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to register WebSocket connection");
            let _ = sender
                .send(Message::Text(protocol::error_envelope(&e.to_string()).to_string()))
                .await;
            return;
        }
    };

    // Announce endpoint identity before anything else is sent
    let hello = protocol::system_hello(hub.endpoint(), &connection_id);
    if sender.send(Message::Text(hello.to_string())).await.is_err() {
        tracing::debug!(connection_id = %connection_id, "Failed to send hello envelope");
        hub.unregister(&connection_id).await;
        return;
    }

    let conn_id_for_send = connection_id.clone();

    // Task to forward frames from the registry channel to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let outcome = match frame {
                Frame::Envelope(envelope) => {
                    sender.send(Message::Text(envelope.to_string())).await
                }
                Frame::Probe => sender.send(Message::Ping(Vec::new())).await,
                Frame::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if outcome.is_err() {
                tracing::debug!(
                    connection_id = %conn_id_for_send,
                    "WebSocket send failed, closing connection"
                );
                break;
            }
        }
    });

    // Per-connection keepalive: a ping envelope pushed on a fixed interval,
    // owned by the registry entry so closing the connection cancels it.
    // Independent from the supervisor's low-level probes.
    let probe_hub = Arc::clone(&hub);
    let probe_id = connection_id.clone();
    let probe_timer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(probe_hub.probe_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            // A closed handle means the connection is gone; stop instead of
            // sending into a half-closed transport.
            if probe_hub
                .send_envelope(&probe_id, protocol::keepalive_ping())
                .await
                .is_err()
            {
                break;
            }
        }
    });
    hub.attach_timer(&connection_id, probe_timer).await;

    let hub_for_recv = Arc::clone(&hub);
    let conn_id_for_recv = connection_id.clone();

    // Task to receive messages from the socket and dispatch them
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(msg) => {
                    if !handle_ws_message(&hub_for_recv, &conn_id_for_recv, msg).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %conn_id_for_recv,
                        error = %e,
                        "WebSocket receive error"
                    );
                    counter!(names::HUB_ERRORS_TOTAL, "tier" => "websocket").increment(1);
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    // Cleanup: unregister from hub (cancels the keepalive timer)
    hub.unregister(&connection_id).await;
}

/// Handle a received WebSocket message
///
/// Returns false if the connection should be closed. A malformed frame is
/// never fatal: the sender gets one error envelope and stays registered.
pub(crate) async fn handle_ws_message(
    hub: &Arc<SocketHub>,
    connection_id: &str,
    message: Message,
) -> bool {
    match message {
        Message::Text(text) => {
            hub.touch(connection_id).await;
            match serde_json::from_str::<Value>(&text) {
                Ok(envelope) => {
                    let kind = envelope
                        .get("type")
                        .and_then(Value::as_str)
                        .map(MessageKind::parse)
                        .unwrap_or(MessageKind::Unclassified);
                    counter!(
                        names::HUB_MESSAGES_TOTAL,
                        "tier" => "websocket",
                        "kind" => kind.as_str()
                    )
                    .increment(1);

                    let reply = protocol::dispatch(&envelope, Utc::now());
                    let _ = hub.send_envelope(connection_id, reply).await;
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        error = %e,
                        "Invalid client envelope"
                    );
                    counter!(names::HUB_ERRORS_TOTAL, "tier" => "websocket").increment(1);
                    let envelope =
                        protocol::error_envelope(&format!("Invalid message format: {}", e));
                    let _ = hub.send_envelope(connection_id, envelope).await;
                }
            }
            true
        }
        Message::Binary(_) => {
            let envelope = protocol::error_envelope("Binary messages not supported");
            let _ = hub.send_envelope(connection_id, envelope).await;
            true
        }
        Message::Ping(_) => {
            // Axum answers pings automatically
            hub.touch(connection_id).await;
            true
        }
        Message::Pong(_) => {
            // The client's transport layer answered our probe
            hub.ack(connection_id).await;
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %connection_id, "Client requested close");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::LogAuditSink;
    use crate::config::WebSocketConfig;
    use serde_json::json;

    async fn hub_with_connection() -> (
        Arc<SocketHub>,
        String,
        mpsc::UnboundedReceiver<Frame>,
    ) {
        let hub = Arc::new(SocketHub::new(
            "/ws",
            &WebSocketConfig::default(),
            Arc::new(LogAuditSink),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await.unwrap();
        (hub, id, rx)
    }

    fn envelope_from(frame: Frame) -> Value {
        match frame {
            Frame::Envelope(envelope) => envelope,
            other => panic!("expected envelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ping_frame_gets_pong_reply() {
        let (hub, id, mut rx) = hub_with_connection().await;

        let text = json!({"type": "ping", "timestamp": "2026-01-01T00:00:00.000Z"}).to_string();
        assert!(handle_ws_message(&hub, &id, Message::Text(text)).await);

        let reply = envelope_from(rx.recv().await.unwrap());
        assert_eq!(reply["type"], "pong");
        assert_eq!(reply["originalTimestamp"], "2026-01-01T00:00:00.000Z");
        assert!(reply["latency"].as_i64().unwrap() >= 0);
    }

    #[tokio::test]
    async fn test_message_frame_echoed_with_flag() {
        let (hub, id, mut rx) = hub_with_connection().await;

        let text = json!({"type": "message", "content": "hi"}).to_string();
        assert!(handle_ws_message(&hub, &id, Message::Text(text)).await);

        let reply = envelope_from(rx.recv().await.unwrap());
        assert_eq!(reply["type"], "message");
        assert_eq!(reply["content"], "hi");
        assert_eq!(reply["echo"], true);
        assert!(reply["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_malformed_frame_yields_single_error_and_keeps_connection() {
        let (hub, id, mut rx) = hub_with_connection().await;

        assert!(handle_ws_message(&hub, &id, Message::Text("{not json".into())).await);

        let reply = envelope_from(rx.recv().await.unwrap());
        assert_eq!(reply["type"], "error");
        assert!(rx.try_recv().is_err());

        // Still registered and usable for subsequent valid frames.
        assert!(hub.contains(&id).await);
        let text = json!({"type": "ping"}).to_string();
        assert!(handle_ws_message(&hub, &id, Message::Text(text)).await);
        let reply = envelope_from(rx.recv().await.unwrap());
        assert_eq!(reply["type"], "pong");
    }

    #[tokio::test]
    async fn test_unclassified_type_generic_echo() {
        let (hub, id, mut rx) = hub_with_connection().await;

        let text = json!({"type": "telemetry", "value": 9}).to_string();
        assert!(handle_ws_message(&hub, &id, Message::Text(text)).await);

        let reply = envelope_from(rx.recv().await.unwrap());
        assert_eq!(reply["type"], "echo");
        assert_eq!(reply["received"]["value"], 9);
    }

    #[tokio::test]
    async fn test_binary_frame_rejected_but_not_fatal() {
        let (hub, id, mut rx) = hub_with_connection().await;

        assert!(handle_ws_message(&hub, &id, Message::Binary(vec![1, 2, 3])).await);

        let reply = envelope_from(rx.recv().await.unwrap());
        assert_eq!(reply["type"], "error");
        assert!(hub.contains(&id).await);
    }

    #[tokio::test]
    async fn test_pong_frame_acks_liveness() {
        let (hub, id, mut rx) = hub_with_connection().await;

        // Mark the connection awaiting an ack.
        assert!(hub.probe_cycle().await.is_empty());
        assert_eq!(rx.recv().await, Some(Frame::Probe));

        assert!(handle_ws_message(&hub, &id, Message::Pong(Vec::new())).await);

        // The next cycle probes again instead of terminating.
        assert!(hub.probe_cycle().await.is_empty());
        assert!(hub.contains(&id).await);
    }

    #[tokio::test]
    async fn test_close_frame_ends_loop() {
        let (hub, id, _rx) = hub_with_connection().await;
        assert!(!handle_ws_message(&hub, &id, Message::Close(None)).await);
    }
}
