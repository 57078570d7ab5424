// ABOUTME: Line-buffering SSE parser for the peer-side push channel
// ABOUTME: Handles partial lines across TCP boundaries and multiple frames per chunk
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

//! # Push-channel frame parser
//!
//! SSE frames are newline-delimited, but TCP does not align network chunks
//! with frame boundaries. This parser buffers incomplete lines and emits
//! `data:` payloads only when a full line is available, so a JSON message
//! split across two chunks is reassembled and a chunk batching several
//! frames yields all of them.
//!
//! Keep-alive comment lines (`:keepalive`) and other non-`data:` fields
//! are skipped.

use std::mem;

/// Line-buffering SSE parser
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    /// Accumulated bytes not yet terminated by a newline
    buffer: String,
}

impl SseLineBuffer {
    /// Create a new empty line buffer
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Feed raw bytes from a TCP chunk, returning complete `data:` payloads
    ///
    /// Bytes are appended to the internal buffer. Complete lines are
    /// extracted and their `data:` payloads returned; any trailing partial
    /// line stays buffered for the next `feed()`.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let text = String::from_utf8_lossy(bytes);
        self.buffer.push_str(&text);

        let mut payloads = Vec::new();

        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim_end_matches('\r').to_owned();
            self.buffer = self.buffer[newline_pos + 1..].to_owned();

            if let Some(payload) = extract_data(&line) {
                payloads.push(payload);
            }
        }

        payloads
    }

    /// Flush any remaining buffered content as a final payload
    ///
    /// Called when the byte stream ends with no trailing newline.
    pub fn flush(&mut self) -> Option<String> {
        let remaining = mem::take(&mut self.buffer);
        extract_data(remaining.trim_end_matches('\r'))
    }
}

fn extract_data(line: &str) -> Option<String> {
    let trimmed = line.trim();

    // Empty lines separate events; comment lines are keep-alives.
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }

    let payload = trimmed.strip_prefix("data:")?.trim_start();
    if payload.is_empty() {
        None
    } else {
        Some(payload.to_owned())
    }
}
