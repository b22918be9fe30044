//! Server-Sent Events: engagement event feed

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use viewrec_common::events::EngagementEvent;

use super::AppState;

fn event_name(event: &EngagementEvent) -> &'static str {
    match event {
        EngagementEvent::TrackingStarted { .. } => "TrackingStarted",
        EngagementEvent::ViewConfirmed { .. } => "ViewConfirmed",
        EngagementEvent::ViewRecorded { .. } => "ViewRecorded",
        EngagementEvent::ViewRecordFailed { .. } => "ViewRecordFailed",
        EngagementEvent::TrackingStopped { .. } => "TrackingStopped",
    }
}

/// GET /api/events
///
/// Streams every [`EngagementEvent`] published after the client connects.
/// A client that falls behind skips the events it missed.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.events.subscribe();
    info!(subscribers = state.events.subscriber_count(), "SSE client connected");

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event(event_name(&event)).json_data(&event) {
                    Ok(sse_event) => yield Ok(sse_event),
                    Err(e) => warn!(error = %e, "Failed to serialize engagement event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "SSE client lagging, events skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
