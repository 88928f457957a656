use bytes::BytesMut;
use serde_json::Value;
use thiserror::Error;

use crate::models::StreamChunk;

/// Longest line kept while waiting for its newline
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("SSE line exceeds {limit} bytes without a newline")]
pub struct LineTooLong {
    pub limit: usize,
}

/// Incremental decoder for an upstream server-sent-event body.
///
/// Bytes arrive in arbitrary network chunks; complete lines are turned into
/// [`StreamChunk`]s and any partial line is kept for the next `feed`.
/// Consecutive `data:` lines belong to one event and are emitted together
/// when the blank separator arrives.
pub struct SseLineDecoder {
    buffer: BytesMut,
    data_lines: Vec<String>,
    max_line: usize,
    done: bool,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            data_lines: Vec::new(),
            max_line: MAX_LINE_BYTES,
            done: false,
        }
    }

    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line.max(1);
        self
    }

    /// Feed a chunk of bytes, returning every chunk completed by it
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<StreamChunk>, LineTooLong> {
        if self.done {
            return Ok(Vec::new());
        }
        self.buffer.extend_from_slice(data);

        let mut chunks = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            let line = String::from_utf8_lossy(&line[..pos]);

            self.decode_line(&line, &mut chunks);
            if self.done {
                self.buffer.clear();
                return Ok(chunks);
            }
        }

        if self.buffer.len() > self.max_line {
            self.buffer.clear();
            self.data_lines.clear();
            self.done = true;
            return Err(LineTooLong {
                limit: self.max_line,
            });
        }

        Ok(chunks)
    }

    /// Flush a trailing line that had no newline, and any unterminated event
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        if self.done {
            return chunks;
        }

        if !self.buffer.is_empty() {
            let rest = self.buffer.split();
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.decode_line(&line, &mut chunks);
        }
        if !self.done {
            self.flush_data(&mut chunks);
        }
        chunks
    }

    /// Whether the upstream sent its end-of-stream marker
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Bytes held back waiting for a newline
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn flush_data(&mut self, chunks: &mut Vec<StreamChunk>) {
        if self.data_lines.is_empty() {
            return;
        }
        let mut event = String::new();
        for data in self.data_lines.drain(..) {
            event.push_str("data: ");
            event.push_str(&data);
            event.push('\n');
        }
        event.push('\n');
        chunks.push(StreamChunk::Event(event));
    }

    fn finish_with_done(&mut self, chunks: &mut Vec<StreamChunk>) {
        self.flush_data(chunks);
        chunks.push(StreamChunk::Done);
        self.done = true;
    }

    fn decode_line(&mut self, line: &str, chunks: &mut Vec<StreamChunk>) {
        let line = line.trim();

        // A blank line ends the current event
        if line.is_empty() {
            self.flush_data(chunks);
            return;
        }
        // `:` keep-alive comments carry nothing
        if line.starts_with(':') {
            return;
        }

        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim_start();
            if data == "[DONE]" {
                self.finish_with_done(chunks);
            } else {
                self.data_lines.push(data.to_string());
            }
            return;
        }

        if ["event:", "id:", "retry:"]
            .iter()
            .any(|field| line.starts_with(field))
        {
            chunks.push(StreamChunk::Event(format!("{}\n", line)));
            return;
        }

        self.flush_data(chunks);
        if line == "[DONE]" {
            self.finish_with_done(chunks);
            return;
        }

        // Unframed payload: keep JSON as JSON, anything else as a string
        let value = serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string()));
        chunks.push(StreamChunk::Data(value));
    }
}

impl Default for SseLineDecoder {
    fn default() -> Self {
        Self::new()
    }
}
