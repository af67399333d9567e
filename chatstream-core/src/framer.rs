//! Line framing over an unaligned chunk sequence.
//!
//! Chunks may split a line anywhere, including inside a multi-byte UTF-8
//! sequence, so the pending tail is kept as raw bytes and only complete lines
//! are decoded. The buffer is unbounded; a line that never terminates grows
//! it until the stream ends.

/// Splits incoming chunks into complete `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, in order.
    /// Terminators (`\n` or `\r\n`) are stripped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        // Bytes before this offset were already searched on earlier feeds.
        let mut from = self.buf.len();
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[from..].iter().position(|b| *b == b'\n') {
            let nl = from + pos;
            lines.push(decode_line(&self.buf[start..nl]));
            start = nl + 1;
            from = start;
        }
        self.buf.drain(..start);
        lines
    }

    /// Recover a final line that arrived without a trailing newline.
    /// Call once, after the source reports end of stream.
    pub fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.buf);
        Some(decode_line(&tail))
    }

    /// Number of bytes held back waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
