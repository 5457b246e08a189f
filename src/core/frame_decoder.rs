//! Splits a stream of arbitrarily chunked bytes into newline-delimited lines.
//!
//! Bytes are decoded as UTF-8 incrementally: an incomplete multi-byte sequence
//! at the end of a chunk is held until the next chunk completes it, so a
//! character split across a chunk boundary is never corrupted.

use memchr::memchr;

const REPLACEMENT: char = '\u{FFFD}';

#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Undecoded tail of the previous chunk (an incomplete UTF-8 sequence).
    pending: Vec<u8>,
    /// Decoded text not yet terminated by a newline.
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `chunk` and appends it to the line buffer.
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        let mut consumed = 0;
        while consumed < self.pending.len() {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    consumed = self.pending.len();
                }
                Err(err) => {
                    let valid = consumed + err.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.pending[consumed..valid]));
                    match err.error_len() {
                        Some(invalid) => {
                            self.buffer.push(REPLACEMENT);
                            consumed = valid + invalid;
                        }
                        None => {
                            consumed = valid;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..consumed);
    }

    /// Removes and returns the next complete line, without its terminator.
    /// A trailing carriage return is stripped.
    pub fn next_line(&mut self) -> Option<String> {
        let newline = memchr(b'\n', self.buffer.as_bytes())?;
        let mut line: String = self.buffer.drain(..=newline).collect();
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }

    /// Number of decoded bytes waiting for a line terminator.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Flushes whatever remains once the underlying stream has ended.
    ///
    /// An incomplete trailing sequence is decoded as U+FFFD. Nothing is
    /// returned when the remainder is only whitespace; otherwise the remainder
    /// is split into lines, dropping empty ones.
    pub fn finish(&mut self) -> Vec<String> {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }

        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            return Vec::new();
        }

        rest.split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }
}
