// src/server/api/events.rs

//! Server-sent events on `/api/events`: `event: state` messages broadcast
//! onto `AppState::events_tx`, interleaved with a periodic `event:
//! heartbeat` so idle clients can detect a dead connection.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self as stream_util, Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;

use crate::server::AppState;

pub async fn stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let state_events = BroadcastStream::new(state.events_tx.subscribe()).filter_map(|msg| async move {
        match msg {
            Ok(payload) => Some(Event::default().event("state").data(payload)),
            Err(_) => None,
        }
    });

    let heartbeats = stream_util::unfold((), |_| async {
        tokio::time::sleep(Duration::from_secs(15)).await;
        Some((Event::default().event("heartbeat").data("{}"), ()))
    });

    let merged = stream_util::select(state_events, heartbeats).map(Ok);

    Sse::new(merged).keep_alive(KeepAlive::default())
}
