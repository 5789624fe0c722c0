use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use pal_bus::EventFilter;
use pal_services::Services;
use tracing::debug;

/// GET /events: upgrade to a one-way `text/event-stream`.
///
/// Each message is `event:<type>\ndata:<json>\n\n`; a `: ping` comment
/// keeps the connection warm every 15 seconds. A subscriber that falls
/// behind its inbox sees a single `events:lag` message instead of the
/// dropped tail; it never slows other subscribers down.
pub async fn events_stream(
    State(services): State<Services>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = services.bus().subscribe(EventFilter::all());

    let stream = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            let kind = event.kind.as_str().to_string();
            match Event::default().event(&kind).json_data(&event) {
                Ok(sse_event) => yield Ok(sse_event),
                Err(e) => debug!(kind, "unserializable bus event skipped: {}", e),
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
