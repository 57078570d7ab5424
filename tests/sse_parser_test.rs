// ABOUTME: Tests for the push-channel SSE line parser
// ABOUTME: Validates chunk reassembly, batched frames, and keep-alive skipping
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use switchboard::client::sse::SseLineBuffer;

#[test]
fn test_single_frame() {
    let mut parser = SseLineBuffer::new();
    let payloads = parser.feed(b"data: {\"jsonrpc\":\"2.0\"}\n\n");
    assert_eq!(payloads, vec![r#"{"jsonrpc":"2.0"}"#]);
}

#[test]
fn test_multiple_frames_in_one_chunk() {
    let mut parser = SseLineBuffer::new();
    let payloads = parser.feed(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
    assert_eq!(payloads, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
}

#[test]
fn test_frame_split_across_chunks() {
    let mut parser = SseLineBuffer::new();
    assert!(parser.feed(b"data: {\"messa").is_empty());
    let payloads = parser.feed(b"ge\":\"hi\"}\n\n");
    assert_eq!(payloads, vec![r#"{"message":"hi"}"#]);
}

#[test]
fn test_keepalive_comments_are_skipped() {
    let mut parser = SseLineBuffer::new();
    let payloads = parser.feed(b":keepalive\n\ndata: {\"x\":1}\n\n:keepalive\n\n");
    assert_eq!(payloads, vec![r#"{"x":1}"#]);
}

#[test]
fn test_crlf_line_endings() {
    let mut parser = SseLineBuffer::new();
    let payloads = parser.feed(b"data: {\"x\":1}\r\n\r\n");
    assert_eq!(payloads, vec![r#"{"x":1}"#]);
}

#[test]
fn test_data_prefix_without_space() {
    let mut parser = SseLineBuffer::new();
    let payloads = parser.feed(b"data:{\"x\":1}\n\n");
    assert_eq!(payloads, vec![r#"{"x":1}"#]);
}

#[test]
fn test_flush_recovers_unterminated_frame() {
    let mut parser = SseLineBuffer::new();
    assert!(parser.feed(b"data: {\"tail\":true}").is_empty());
    assert_eq!(parser.flush(), Some(r#"{"tail":true}"#.to_owned()));
    // Flushing consumes the buffer
    assert_eq!(parser.flush(), None);
}

#[test]
fn test_non_data_fields_are_ignored() {
    let mut parser = SseLineBuffer::new();
    let payloads = parser.feed(b"event: message\nid: 4\nretry: 100\ndata: {\"x\":1}\n\n");
    assert_eq!(payloads, vec![r#"{"x":1}"#]);
}
