//! Line framing for the gate protocol.
//!
//! The transport hands us arbitrary chunks: a chunk may end in the middle of a
//! line (or in the middle of a multi-byte UTF-8 sequence) and may carry several
//! lines at once. The framer accumulates bytes and yields only complete,
//! newline-terminated lines, with the terminator (and an optional preceding
//! `\r`) stripped.

use bytes::BytesMut;
use log::warn;

use crate::error::ProtocolError;

/// Line terminator used in both directions.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Maximum length of a line, terminator excluded.
///
/// Longer lines are dropped whether they arrive in one chunk or several. A
/// device that never sends a terminator would otherwise grow the buffer
/// without bound, so a partial line past the limit is discarded at once and
/// everything up to the next terminator is skipped.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Reassembles newline-terminated lines from a chunked byte stream.
#[derive(Debug)]
pub struct LineFramer {
    /// Bytes received since the last complete line.
    buffer: BytesMut,
    /// Longest line that is emitted.
    max_line_length: usize,
    /// Set after an overflow until the next terminator is seen.
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    /// Create a new framer with the default line limit.
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    /// Create a framer with a custom line limit.
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        LineFramer {
            buffer: BytesMut::with_capacity(256),
            max_line_length: max_line_length.max(1),
            discarding: false,
        }
    }

    /// Feed a chunk of received bytes and return every line it completes.
    ///
    /// Returned lines never contain the terminator. A trailing partial line is
    /// kept and prefixed to the next chunk. Empty chunks are no-ops.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        if chunk.is_empty() {
            return lines;
        }

        self.buffer.extend_from_slice(chunk);

        while let Some(end) = self.buffer.iter().position(|&b| b == LINE_TERMINATOR) {
            let mut line = self.buffer.split_to(end + 1);
            line.truncate(end);

            if self.discarding {
                // Tail of an overlong line
                self.discarding = false;
                continue;
            }

            if line.len() > self.max_line_length {
                self.warn_overflow(line.len());
                continue;
            }

            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }

        if self.buffer.len() > self.max_line_length {
            self.warn_overflow(self.buffer.len());
            self.buffer.clear();
            self.discarding = true;
        }

        lines
    }

    fn warn_overflow(&self, actual: usize) {
        let err = ProtocolError::BufferOverflow {
            max: self.max_line_length,
            actual,
        };
        warn!("discarding line: {}", err);
    }

    /// Feed a text chunk. Equivalent to [`feed`](Self::feed) on its UTF-8 bytes.
    pub fn feed_str(&mut self, chunk: &str) -> Vec<String> {
        self.feed(chunk.as_bytes())
    }

    /// Drop any buffered partial line.
    ///
    /// Called when the transport closes: an incomplete line at end of stream is
    /// never emitted, and nothing carries over to a later connection.
    /// Returns the number of bytes that were discarded.
    pub fn reset(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.discarding = false;
        dropped
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Encode a line for transmission, appending the terminator.
    pub fn encode_line(text: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(text.len() + 1);
        buf.extend_from_slice(text.as_bytes());
        buf.push(LINE_TERMINATOR);
        buf
    }
}
