pub mod parser;
pub mod sse;

pub use parser::{LineTooLong, MAX_LINE_BYTES, SseLineDecoder};
pub use sse::{DONE_EVENT, SseStream, format_data, format_error, normalize_response, stream_message};
