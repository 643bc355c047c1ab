//! Provider adapters. Each submodule owns its vendor's wire types and never
//! leaks them past the [`crate::ChatStream`] boundary.

pub(crate) mod anthropic;
pub(crate) mod cohere;
pub(crate) mod google;
pub(crate) mod ollama;
pub(crate) mod openai;

use std::pin::Pin;

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::Stream;
use futures::StreamExt;

use crate::error::LlmError;

pub(crate) type SseStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Event, EventStreamError<reqwest::Error>>> + Send + Sync>>;

/// Send a vendor request and map non-success statuses through the §retry
/// classification table.
pub(crate) async fn send_checked(
    builder: reqwest::RequestBuilder,
    api: &str,
    model: &str,
    openai_protocol: bool,
) -> Result<reqwest::Response, LlmError> {
    let response = builder
        .send()
        .await
        .map_err(|err| LlmError::Connection(format!("could not reach '{api}': {err}")))?;

    let status = response.status();

    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        log::debug!("'{api}' returned {status}: {body}");

        return Err(LlmError::from_status(
            status.as_u16(),
            body,
            api,
            model,
            openai_protocol,
        ));
    }

    Ok(response)
}

/// Frame a streaming response body as SSE events.
pub(crate) fn sse_stream(response: reqwest::Response) -> SseStream {
    Box::pin(response.bytes_stream().eventsource())
}

/// The next SSE event. Malformed frames are logged and skipped; transport
/// errors read as end-of-stream, which is also how cancellation arrives, and
/// the accumulated turn is still worth finishing.
pub(crate) async fn next_event(stream: &mut SseStream) -> Option<Event> {
    loop {
        match stream.next().await {
            Some(Ok(event)) => return Some(event),
            Some(Err(EventStreamError::Transport(err))) => {
                log::debug!("SSE stream ended: {err}");
                return None;
            }
            Some(Err(err)) => {
                log::warn!("skipping malformed SSE frame: {err}");
            }
            None => return None,
        }
    }
}
