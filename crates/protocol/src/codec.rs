//! Line framing for the client socket
//!
//! Inbound bytes are framed into newline-terminated commands. The framing is
//! byte-oriented and deliberately forgiving, because the protocol was
//! designed to be driven from a raw telnet session as well as from the
//! extension:
//!
//! - `\n` terminates a line; an immediately preceding `\r` is dropped
//! - backspace (0x08) removes the last buffered byte of the current line
//! - partial lines are kept across reads until their terminator arrives
//!
//! Lines that exceed [`MAX_LINE_LEN`] or are not valid UTF-8 are dropped
//! rather than surfaced, so a misbehaving client cannot grow the buffer or
//! wedge the framing; [`LineBuffer::take_dropped`] reports how many were
//! discarded. Outbound text has every bare `\n` expanded to `\r\n`.
//!
//! # Example
//!
//! ```
//! use protocol::codec::LineBuffer;
//!
//! let mut buf = LineBuffer::new();
//! assert!(buf.push_bytes(b"inf").is_empty());
//! assert_eq!(buf.push_bytes(b"o\r\nlist\n"), vec!["info", "list"]);
//! ```

use bytes::BytesMut;

/// Out-of-band ping byte sent when a notification is queued.
pub const BELL: u8 = 0x07;

/// Backspace, honored as a one-byte erase in the current line.
const BACKSPACE: u8 = 0x08;

/// Upper bound on a single command line, to keep a misbehaving client from
/// growing the buffer without limit.
pub const MAX_LINE_LEN: usize = 8192;

/// Accumulates raw socket bytes and yields complete command lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: BytesMut,
    /// Set after an oversized line; input is discarded until the next `\n`.
    skipping: bool,
    dropped: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `data` and return every line it completed, oldest first.
    pub fn push_bytes(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in data {
            if self.skipping {
                if byte == b'\n' {
                    self.skipping = false;
                }
                continue;
            }

            match byte {
                b'\n' => {
                    let mut raw = self.partial.split();
                    if raw.last() == Some(&b'\r') {
                        raw.truncate(raw.len() - 1);
                    }
                    match std::str::from_utf8(&raw) {
                        Ok(line) => lines.push(line.to_string()),
                        Err(_) => self.dropped += 1,
                    }
                }
                BACKSPACE => {
                    let len = self.partial.len();
                    if len > 0 {
                        self.partial.truncate(len - 1);
                    }
                }
                _ => {
                    if self.partial.len() >= MAX_LINE_LEN {
                        self.partial.clear();
                        self.skipping = true;
                        self.dropped += 1;
                    } else {
                        self.partial.extend_from_slice(&[byte]);
                    }
                }
            }
        }

        lines
    }

    /// Number of lines discarded since the last call, resetting the count.
    pub fn take_dropped(&mut self) -> usize {
        std::mem::take(&mut self.dropped)
    }

    /// Bytes buffered for the current (incomplete) line.
    pub fn pending_len(&self) -> usize {
        self.partial.len()
    }
}

/// Expand every bare `\n` to `\r\n`. Existing `\r\n` pairs are untouched.
pub fn normalize_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    let mut prev_cr = false;
    for c in text.chars() {
        if c == '\n' && !prev_cr {
            out.push('\r');
        }
        prev_cr = c == '\r';
        out.push(c);
    }
    out
}
