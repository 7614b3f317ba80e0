//! Event log stream as newline-delimited JSON.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;

use sf_protocol::{EventLogEntry, Outcome};

use crate::error::ApiResult;
use crate::state::AppState;
use crate::store::{read_from, read_history};

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// First sequence number to return.
    #[serde(default = "default_from")]
    pub from: u64,
    /// Keep the response open and tail new entries.
    #[serde(default)]
    pub follow: bool,
    /// Only entries whose payload has this type (`transition`, `execution`, ...).
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub outcome: Option<Outcome>,
}

impl EventsQuery {
    fn matches(&self, entry: &EventLogEntry) -> bool {
        self.event_type
            .as_deref()
            .is_none_or(|t| entry.payload.type_name() == t)
            && self.outcome.is_none_or(|o| entry.outcome == o)
    }
}

fn default_from() -> u64 {
    1
}

/// GET /api/v1/events?from&follow&type&outcome — one JSON entry per line, in
/// sequence order. Without `follow` the stream ends at the current head.
pub async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Response> {
    let entries = if query.follow {
        read_from(state.ledger.clone(), query.from)
    } else {
        read_history(state.ledger.clone(), query.from).await?
    };

    let entries = entries.filter(move |item| {
        let keep = match item {
            Ok(entry) => query.matches(entry),
            Err(_) => true,
        };
        futures::future::ready(keep)
    });

    let lines = entries.map(|item| -> Result<Vec<u8>, axum::BoxError> {
        let mut line = serde_json::to_vec(&item?)?;
        line.push(b'\n');
        Ok(line)
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}
