use bytes::Bytes;
use futures::{FutureExt, Stream, StreamExt, stream};
use serde_json::{Value, json};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::GatewayError;
use crate::manager::ProviderManager;
use crate::models::{MessageRequest, MessageResponse, StreamChunk};

/// Terminal marker every client stream ends with
pub const DONE_EVENT: &str = "data: [DONE]\n\n";

/// Client-facing server-sent-event byte stream
pub type SseStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Frame a raw payload as a data event
pub fn format_data(value: &Value) -> String {
    format!("data: {}\n\n", value)
}

/// Format an error as an in-band data event
pub fn format_error(err: &GatewayError) -> String {
    let data = json!({
        "type": "error",
        "error": {
            "type": err.error_type(),
            "message": err.to_string()
        }
    });
    format_data(&data)
}

fn done() -> Bytes {
    Bytes::from_static(DONE_EVENT.as_bytes())
}

/// Route a streaming request and normalize whatever comes back.
///
/// Routing failures are reported in-band because the response is already
/// committed by the time the stream is polled.
pub fn stream_message(manager: Arc<ProviderManager>, mut request: MessageRequest) -> SseStream {
    request.stream = true;

    Box::pin(async_stream::stream! {
        let routed = AssertUnwindSafe(manager.route_create_message(&request))
            .catch_unwind()
            .await;

        match routed {
            Ok(Ok(response)) => {
                let mut events = normalize_response(response);
                while let Some(event) = events.next().await {
                    yield event;
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, "Streaming request failed");
                yield Bytes::from(format_error(&e));
                yield done();
            }
            Err(_) => {
                let e = GatewayError::InternalError("routing panicked".to_string());
                error!(error = %e, "Streaming request failed");
                yield Bytes::from(format_error(&e));
                yield done();
            }
        }
    })
}

/// Convert a provider response into the uniform client event sequence.
///
/// Framed chunks pass through untouched, raw payloads get a `data:` frame,
/// and the sequence always ends with exactly one [`DONE_EVENT`].
pub fn normalize_response(response: MessageResponse) -> SseStream {
    match response {
        MessageResponse::Complete(body) => {
            warn!("Provider returned non-streaming response for streaming request, converting to SSE format");
            Box::pin(stream::iter([Bytes::from(format_data(&body)), done()]))
        }
        MessageResponse::Stream(chunks) => {
            let mut chunks = AssertUnwindSafe(chunks).catch_unwind();

            Box::pin(async_stream::stream! {
                while let Some(item) = chunks.next().await {
                    match item {
                        Ok(Ok(StreamChunk::Event(text))) => yield Bytes::from(text),
                        Ok(Ok(StreamChunk::Data(value))) => yield Bytes::from(format_data(&value)),
                        Ok(Ok(StreamChunk::Done)) => break,
                        Ok(Err(e)) => {
                            error!(error = %e, "Upstream stream failed");
                            yield Bytes::from(format_error(&e));
                            break;
                        }
                        Err(_) => {
                            let e = GatewayError::InternalError("upstream stream panicked".to_string());
                            error!(error = %e, "Upstream stream failed");
                            yield Bytes::from(format_error(&e));
                            break;
                        }
                    }
                }
                yield done();
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    async fn collect(stream: SseStream) -> Vec<String> {
        stream
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect()
            .await
    }

    fn chunk_stream(items: Vec<Result<StreamChunk>>) -> MessageResponse {
        MessageResponse::Stream(Box::pin(stream::iter(items)))
    }

    #[test]
    fn test_format_error() {
        let event = format_error(&GatewayError::NoHealthyProviders);

        assert!(event.starts_with("data: "));
        assert!(event.ends_with("\n\n"));
        assert!(event.contains("overloaded_error"));
        assert!(event.contains("No healthy providers available"));
    }

    #[tokio::test]
    async fn test_complete_object_becomes_two_events() {
        let body = json!({"id": "msg_1", "content": [{"type": "text", "text": "Hi"}]});
        let events = collect(normalize_response(MessageResponse::Complete(body.clone()))).await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], format!("data: {}\n\n", body));
        assert_eq!(events[1], DONE_EVENT);
    }

    #[tokio::test]
    async fn test_framed_and_raw_chunks() {
        let response = chunk_stream(vec![
            Ok(StreamChunk::Event("event: ping\n".to_string())),
            Ok(StreamChunk::Event("data: {\"type\":\"ping\"}\n\n".to_string())),
            Ok(StreamChunk::Data(json!({"raw": true}))),
        ]);

        let events = collect(normalize_response(response)).await;
        assert_eq!(
            events,
            vec![
                "event: ping\n".to_string(),
                "data: {\"type\":\"ping\"}\n\n".to_string(),
                "data: {\"raw\":true}\n\n".to_string(),
                DONE_EVENT.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_upstream_done_is_not_duplicated() {
        let response = chunk_stream(vec![
            Ok(StreamChunk::Data(json!({"n": 1}))),
            Ok(StreamChunk::Done),
            Ok(StreamChunk::Data(json!({"n": 2}))),
        ]);

        let events = collect(normalize_response(response)).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events.iter().filter(|e| *e == DONE_EVENT).count(), 1);
    }

    #[tokio::test]
    async fn test_mid_stream_error_terminates_cleanly() {
        let response = chunk_stream(vec![
            Ok(StreamChunk::Data(json!({"n": 1}))),
            Err(GatewayError::provider("minimax", None, "connection reset")),
            Ok(StreamChunk::Data(json!({"n": 2}))),
        ]);

        let events = collect(normalize_response(response)).await;
        assert_eq!(events.len(), 3);
        assert!(events[1].contains("\"type\":\"error\""));
        assert!(events[1].contains("connection reset"));
        assert_eq!(events[2], DONE_EVENT);
    }

    #[tokio::test]
    async fn test_panicking_stream_terminates_cleanly() {
        let chunks = stream::iter(vec![1, 2]).map(|n| {
            if n == 2 {
                panic!("decoder bug");
            }
            Ok::<_, GatewayError>(StreamChunk::Data(json!({"n": n})))
        });
        let response = MessageResponse::Stream(Box::pin(chunks));

        let events = collect(normalize_response(response)).await;
        assert_eq!(events.len(), 3);
        assert!(events[1].contains("upstream stream panicked"));
        assert_eq!(events[2], DONE_EVENT);
    }
}
