//! One-way WebSocket stream of job lifecycle events.

use atrium_events::JobEvent;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::state::AppState;

/// GET /api/v1/ws
///
/// The subscription is taken before the upgrade completes, so no event
/// published after the request arrives is missed.
pub async fn job_event_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let events = state.event_bus.subscribe();
    ws.on_upgrade(move |socket| serve_connection(socket, events))
}

async fn serve_connection(socket: WebSocket, events: broadcast::Receiver<JobEvent>) {
    let conn_id = Uuid::new_v4();
    tracing::info!(%conn_id, "Event stream client connected");

    let (sink, mut inbound) = socket.split();
    let mut forwarder = tokio::spawn(forward_events(conn_id, sink, events));

    // Inbound frames are only read to notice the client leaving.
    loop {
        tokio::select! {
            _ = &mut forwarder => break,
            frame = inbound.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%conn_id, error = %e, "Event stream receive error");
                    break;
                }
            },
        }
    }

    forwarder.abort();
    tracing::info!(%conn_id, "Event stream client disconnected");
}

async fn forward_events(
    conn_id: Uuid,
    mut sink: SplitSink<WebSocket, Message>,
    mut events: broadcast::Receiver<JobEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(%conn_id, skipped, "Event stream client lagging, events dropped");
                continue;
            }
            Err(RecvError::Closed) => return,
        };

        let Some(frame) = event_frame(&event) else {
            continue;
        };
        if sink.send(frame).await.is_err() {
            return;
        }
    }
}

/// Encode an event as a JSON text frame.
fn event_frame(event: &JobEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize job event");
            None
        }
    }
}
