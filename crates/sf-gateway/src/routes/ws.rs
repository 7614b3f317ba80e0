//! WebSocket endpoint: event log replay followed by live entries.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Deserialize;

use sf_protocol::EventLogEntry;

use crate::state::AppState;
use crate::store::{EventLog, StoreResult, read_from};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Replay from this sequence number. Omitted: live entries only.
    pub from: Option<u64>,
}

/// GET /api/v1/ws?from — upgrade to WebSocket for the event stream.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let from = match query.from {
            Some(from) => from,
            None => match state.ledger.head().await {
                Ok(head) => head + 1,
                Err(e) => {
                    tracing::warn!(error = %e, "cannot read event log head");
                    return;
                }
            },
        };
        handle_socket(socket, read_from(state.ledger.clone(), from)).await;
    })
}

pub(crate) fn frame(entry: &EventLogEntry) -> serde_json::Result<Message> {
    Ok(Message::Text(serde_json::to_string(entry)?.into()))
}

async fn handle_socket(
    mut socket: WebSocket,
    mut entries: BoxStream<'static, StoreResult<EventLogEntry>>,
) {
    tracing::info!("WebSocket client connected");

    loop {
        tokio::select! {
            item = entries.next() => {
                let entry = match item {
                    Some(Ok(entry)) => entry,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "event stream failed");
                        break;
                    }
                    None => break,
                };
                let msg = match frame(&entry) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::error!(seq = entry.seq, error = %e, "failed to serialize event");
                        continue;
                    }
                };
                if socket.send(msg).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    tracing::info!("WebSocket client disconnected");
}
