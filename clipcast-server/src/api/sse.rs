//! SSE streams for real-time client updates

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use clipcast_common::api::SpeechTestEvent;
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::{info, warn};

use crate::api::server::AppContext;

/// GET /events - the server's event stream
///
/// Every `ClipcastEvent` fans out to all connected observers; the SSE
/// event name is the variant name, the payload its JSON form.
pub async fn event_stream(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(
        "new SSE client connected, total subscribers: {}",
        ctx.bus.subscriber_count() + 1
    );
    let rx = ctx.bus.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => Event::default()
                .event(event.event_type())
                .json_data(&event)
                .ok()
                .map(Ok),
            Err(e) => {
                // Lagged subscriber; skip the gap and continue
                warn!("SSE client lagged: {e:?}");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}

/// SSE response for one speech-test run: transcript/match events followed
/// by a final `end`.
pub fn speech_test_stream(
    events: mpsc::Receiver<SpeechTestEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(events).filter_map(|event| async move {
        let name = match &event {
            SpeechTestEvent::Transcript { .. } => "transcript",
            SpeechTestEvent::Match { .. } => "match",
            SpeechTestEvent::End => "end",
        };
        Event::default().event(name).json_data(&event).ok().map(Ok)
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
