//! Overlay Handler
//!
//! Upgrade handling and message dispatch for the socket-abstraction
//! overlay. The overlay speaks the same envelope contract as the
//! persistent-socket tier but adds its own concepts: client-supplied
//! connection ids, per-message acknowledgements (`ackId`), and rooms.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::hub::OverlayHub;
use crate::metrics as names;
use crate::protocol::{self, MessageKind};
use crate::registry::Frame;

/// Query parameters accepted on the overlay upgrade.
#[derive(Debug, Deserialize)]
pub struct OverlayParams {
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

/// Overlay upgrade handler.
pub async fn overlay_handler(
    ws: WebSocketUpgrade,
    params: OverlayParams,
    hub: Arc<OverlayHub>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params.client_id, hub))
}

async fn handle_socket(socket: WebSocket, client_id: Option<String>, hub: Arc<OverlayHub>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

    let connection_id = match hub.register(client_id, tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to register overlay connection");
            let _ = sender
                .send(Message::Text(protocol::error_envelope(&e.to_string()).to_string()))
                .await;
            return;
        }
    };

    let hello = protocol::system_hello(hub.path(), &connection_id);
    if sender.send(Message::Text(hello.to_string())).await.is_err() {
        hub.unregister(&connection_id).await;
        return;
    }

    let conn_id_for_send = connection_id.clone();
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
                    "Overlay send failed, closing connection"
                );
                break;
            }
        }
    });

    let hub_for_recv = Arc::clone(&hub);
    let conn_id_for_recv = connection_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(msg) => {
                    if !handle_overlay_message(&hub_for_recv, &conn_id_for_recv, msg).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %conn_id_for_recv,
                        error = %e,
                        "Overlay receive error"
                    );
                    counter!(names::HUB_ERRORS_TOTAL, "tier" => "overlay").increment(1);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    hub.unregister(&connection_id).await;
}

/// Handle one inbound overlay message.
///
/// Returns false if the connection should be closed.
pub(crate) async fn handle_overlay_message(
    hub: &Arc<OverlayHub>,
    connection_id: &str,
    message: Message,
) -> bool {
    match message {
        Message::Text(text) => {
            hub.touch(connection_id).await;
            match serde_json::from_str::<Value>(&text) {
                Ok(envelope) => {
                    dispatch_envelope(hub, connection_id, &envelope).await;
                }
                Err(e) => {
                    counter!(names::HUB_ERRORS_TOTAL, "tier" => "overlay").increment(1);
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
        Message::Ping(_) | Message::Pong(_) => {
            hub.touch(connection_id).await;
            true
        }
        Message::Close(_) => false,
    }
}

/// Overlay dispatch: rooms and acks first, then the shared envelope rules.
async fn dispatch_envelope(hub: &Arc<OverlayHub>, connection_id: &str, envelope: &Value) {
    let kind = envelope.get("type").and_then(Value::as_str).unwrap_or("");
    counter!(
        names::HUB_MESSAGES_TOTAL,
        "tier" => "overlay",
        "kind" => MessageKind::parse(kind).as_str()
    )
    .increment(1);

    match kind {
        "join" => {
            if let Some(room) = envelope.get("room").and_then(Value::as_str) {
                hub.join(connection_id, room).await;
            } else {
                let _ = hub
                    .send_envelope(connection_id, protocol::error_envelope("join requires a room"))
                    .await;
            }
        }
        "leave" => {
            if let Some(room) = envelope.get("room").and_then(Value::as_str) {
                hub.leave(connection_id, room).await;
            }
        }
        _ => {
            // An envelope addressed to a room fans out to the other members;
            // everything else gets the shared reply semantics.
            if let Some(room) = envelope.get("room").and_then(Value::as_str) {
                let reached = hub.send_to_room(room, connection_id, envelope).await;
                tracing::debug!(connection_id = %connection_id, room, reached, "room delivery");
            } else {
                let reply = protocol::dispatch(envelope, Utc::now());
                let _ = hub.send_envelope(connection_id, reply).await;
            }
        }
    }

    // Acknowledge after the message has been handled.
    if let Some(ack_id) = envelope.get("ackId") {
        let _ = hub
            .send_envelope(connection_id, protocol::ack(ack_id))
            .await;
    }
}
