//! Server-Sent Events endpoint

use axum::{extract::State, response::sse::Event, response::Sse};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
///
/// Streams session events (model activation, artifact transitions, kept
/// takes) with a periodic heartbeat.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    voxfab_common::sse::create_event_sse_stream("voxfab-ed", &state.event_bus)
}
