use super::builder::CompletionsResponseBuilder;
use super::error::CompletionStreamError;
use super::parser::parse_message;
use super::types::ProtocolEvent;
use crate::sse::{DecoderOptions, decode_frames};
use async_stream::try_stream;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::pin::Pin;
use tracing::{debug, warn};
use url::Url;

pub type CompletionEventStream =
    Pin<Box<dyn Stream<Item = Result<ProtocolEvent, CompletionStreamError>> + Send>>;

/// Typed events for one completion request.
///
/// The stream ends right after an `error` or `done` event. A body that runs
/// out before either yields [`CompletionStreamError::UnexpectedEnd`].
pub fn completion_events<S, B, E>(
    url: &Url,
    body: S,
    options: DecoderOptions,
) -> CompletionEventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let mut builder = CompletionsResponseBuilder::from_url(url);
    let mut frames = decode_frames(body, options);

    let stream = try_stream! {
        while let Some(frame) = frames.next().await {
            let message = frame.map_err(CompletionStreamError::from)?;
            let event = parse_message(&mut builder, &message).map_err(CompletionStreamError::from)?;
            let terminal = event.is_terminal();
            yield event;
            if terminal {
                return;
            }
        }

        debug!(
            api_version = builder.api_version(),
            "completion stream ended without a terminal event"
        );
        Err(CompletionStreamError::UnexpectedEnd)?;
    };

    Box::pin(stream)
}

/// Check the response status, then stream its body through
/// [`completion_events`].
pub async fn completion_events_from_response(
    url: &Url,
    response: reqwest::Response,
    options: DecoderOptions,
) -> Result<CompletionEventStream, CompletionStreamError> {
    let status = response.status();
    if !status.is_success() {
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                debug!(error = %err, "failed to read rejected completion response body");
                String::new()
            }
        };
        warn!(status = status.as_u16(), "completion request rejected");
        return Err(CompletionStreamError::Http {
            status: status.as_u16(),
            body,
        });
    }

    Ok(completion_events(url, response.bytes_stream(), options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completions::FrameParseError;
    use futures::stream;
    use pretty_assertions::assert_eq;
    use std::convert::Infallible;

    fn body(wire: &str) -> impl Stream<Item = Result<Vec<u8>, Infallible>> + Send + 'static {
        let chunks: Vec<_> = wire
            .as_bytes()
            .chunks(7)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        stream::iter(chunks)
    }

    fn url(query: &str) -> Url {
        Url::parse(&format!("https://example.com/.api/completions/stream{query}"))
            .expect("valid url")
    }

    fn texts(events: &[Result<ProtocolEvent, CompletionStreamError>]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                Ok(ProtocolEvent::Completion { text, .. }) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn streams_deltas_until_done() {
        let wire = concat!(
            "event: completion\ndata: {\"deltaText\":\"Hel\"}\n\n",
            "event: completion\ndata: {\"deltaText\":\"lo\",\"stopReason\":\"end_turn\"}\n\n",
            "event: done\ndata: {}\n\n",
            "event: completion\ndata: {\"deltaText\":\"ignored\"}\n\n",
        );

        let events: Vec<_> =
            completion_events(&url("?api-version=2"), body(wire), DecoderOptions::default())
                .collect()
                .await;

        assert_eq!(texts(&events), vec!["Hel", "Hello"]);
        assert_eq!(events.last(), Some(&Ok(ProtocolEvent::Done)));
    }

    #[tokio::test]
    async fn snapshot_mode_uses_full_text() {
        let wire = concat!(
            "event: completion\ndata: {\"completion\":\"Hel\"}\n\n",
            "event: completion\ndata: {\"completion\":\"Hello\"}\n\n",
            "event: error\ndata: {\"error\":\"overloaded\"}\n\n",
        );

        let events: Vec<_> = completion_events(&url(""), body(wire), DecoderOptions::default())
            .collect()
            .await;

        assert_eq!(texts(&events), vec!["Hel", "Hello"]);
        assert_eq!(
            events.last(),
            Some(&Ok(ProtocolEvent::Error {
                message: "overloaded".into()
            }))
        );
    }

    #[tokio::test]
    async fn missing_terminal_event_is_an_error() {
        let wire = "event: completion\ndata: {\"completion\":\"partial\"}\n\n";
        let events: Vec<_> = completion_events(&url(""), body(wire), DecoderOptions::default())
            .collect()
            .await;

        assert_eq!(texts(&events), vec!["partial"]);
        assert_eq!(
            events.last(),
            Some(&Err(CompletionStreamError::UnexpectedEnd))
        );
    }

    #[tokio::test]
    async fn unknown_event_ends_stream_with_error() {
        let wire = "event: ping\ndata: {}\n\nevent: done\ndata: {}\n\n";
        let events: Vec<_> = completion_events(&url(""), body(wire), DecoderOptions::default())
            .collect()
            .await;

        assert_eq!(
            events,
            vec![Err(CompletionStreamError::Frame(
                FrameParseError::UnknownEventType("ping".into())
            ))]
        );
    }
}
