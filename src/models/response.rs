use futures::Stream;
use serde_json::Value;
use std::fmt;
use std::pin::Pin;

use crate::error::Result;

/// One element of a provider's lazy response sequence
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Protocol text that is already SSE-framed (`event: ...\n`, `data: ...\n\n`)
    Event(String),
    /// A raw payload that still needs a `data:` frame
    Data(Value),
    /// The upstream signalled end of stream
    Done,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// What a provider hands back for a completion call
pub enum MessageResponse {
    /// A full response object, possibly returned even when streaming was requested
    Complete(Value),
    Stream(ChunkStream),
}

impl MessageResponse {
    pub fn is_stream(&self) -> bool {
        matches!(self, MessageResponse::Stream(_))
    }

    /// The complete body, if this is not a stream
    pub fn into_complete(self) -> Option<Value> {
        match self {
            MessageResponse::Complete(value) => Some(value),
            MessageResponse::Stream(_) => None,
        }
    }
}

impl fmt::Debug for MessageResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageResponse::Complete(value) => f.debug_tuple("Complete").field(value).finish(),
            MessageResponse::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}
