//! SSE Handler
//!
//! Turns a streaming request into a `text/event-stream` response fed from
//! the broker's per-connection channel. Dropping the response stream is the
//! client-disconnect signal: it tears the registry entry down and cancels
//! the heartbeat timer.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::Stream;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::broker::SseBroker;
use crate::registry::Frame;

/// Query parameters accepted on the stream endpoint.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

/// GET /api/v1/stream
///
/// Opens a server-push stream for the given (or generated) client id.
pub async fn stream_handler(params: StreamParams, broker: Arc<SseBroker>) -> Response {
    match broker.connect(params.client_id).await {
        Ok((id, rx)) => {
            let stream = EventStream {
                id,
                broker,
                rx,
            };
            Sse::new(stream).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to open SSE stream");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

/// Stream adapter from the registry channel to SSE events.
///
/// Ends when the broker closes the connection; its `Drop` runs when the
/// client goes away and unregisters the stream.
pub struct EventStream {
    id: String,
    broker: Arc<SseBroker>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(Frame::Envelope(envelope))) => {
                    return Poll::Ready(Some(Ok(Event::default().data(envelope.to_string()))));
                }
                // Probes are a socket-tier concept; nothing to write here.
                Poll::Ready(Some(Frame::Probe)) => continue,
                Poll::Ready(Some(Frame::Close)) | Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        let broker = Arc::clone(&self.broker);
        let id = self.id.clone();
        tokio::spawn(async move {
            broker.disconnect(&id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::LogAuditSink;
    use crate::config::SseConfig;
    use futures_util::StreamExt;

    fn test_broker() -> Arc<SseBroker> {
        Arc::new(SseBroker::new(&SseConfig::default(), Arc::new(LogAuditSink)))
    }

    #[tokio::test]
    async fn test_stream_yields_connected_event_first() {
        let broker = test_broker();
        let (id, rx) = broker.connect(Some("c1".into())).await.unwrap();
        let mut stream = EventStream {
            id,
            broker: Arc::clone(&broker),
            rx,
        };

        let event = stream.next().await.unwrap().unwrap();
        // The Event debug format carries the data payload.
        assert!(format!("{event:?}").contains("connected"));
    }

    #[tokio::test]
    async fn test_dropping_stream_unregisters_connection() {
        let broker = test_broker();
        let (id, rx) = broker.connect(Some("c2".into())).await.unwrap();
        let stream = EventStream {
            id: id.clone(),
            broker: Arc::clone(&broker),
            rx,
        };
        assert_eq!(broker.connection_count().await, 1);

        drop(stream);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!broker.contains(&id).await);
    }

    #[tokio::test]
    async fn test_stream_ends_on_close_frame() {
        let broker = test_broker();
        let (id, rx) = broker.connect(Some("c3".into())).await.unwrap();
        let mut stream = EventStream {
            id: id.clone(),
            broker: Arc::clone(&broker),
            rx,
        };

        // Consume the connected event, then close from the broker side.
        stream.next().await.unwrap().unwrap();
        broker.disconnect(&id).await;

        assert!(stream.next().await.is_none());
    }
}
