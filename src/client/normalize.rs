// ABOUTME: Coercion of loose handler return values into content-item lists
// ABOUTME: Applies the image heuristic and JSON fallback for tool results
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

//! Result normalization
//!
//! Tool handlers return whatever is convenient; the wire wants a list of
//! content items. Coercion rules:
//!
//! - a list of content items passes through;
//! - a single content item is wrapped in a one-element list;
//! - a string that looks like an image (`data:image/*` URI or a base64
//!   run of at least 100 chars) becomes an `image` item with an inferred
//!   mime type, any other string a `text` item;
//! - everything else is JSON-serialized into a `text` item.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;

use crate::schema::Content;

/// Minimum length before a bare string is considered base64 image data
const IMAGE_BASE64_MIN_LEN: usize = 100;

/// Coerce a handler return value to a list of content items
#[must_use]
pub fn normalize_result(value: Value) -> Vec<Content> {
    match value {
        Value::Array(ref items) => {
            let parsed: Result<Vec<Content>, _> = items
                .iter()
                .cloned()
                .map(serde_json::from_value)
                .collect();
            match parsed {
                Ok(content) => content,
                Err(_) => vec![json_text(&value)],
            }
        }
        Value::Object(_) => match serde_json::from_value::<Content>(value.clone()) {
            Ok(content) => vec![content],
            Err(_) => vec![json_text(&value)],
        },
        Value::String(text) => vec![normalize_string(text)],
        other => vec![json_text(&other)],
    }
}

fn normalize_string(text: String) -> Content {
    if let Some(rest) = text.strip_prefix("data:image/") {
        let mime_type = infer_data_uri_mime(rest);
        // The payload follows the first comma; a URI without one is kept
        // whole so nothing is silently dropped.
        let data = rest
            .split_once(',')
            .map_or_else(|| text.clone(), |(_, payload)| payload.to_owned());
        return Content::image(data, mime_type);
    }

    if looks_like_base64_image(&text) {
        return Content::image(text, "image/png");
    }

    Content::Text { text }
}

/// Mime type from the `data:image/<subtype>` prefix remainder
fn infer_data_uri_mime(rest: &str) -> &'static str {
    if rest.starts_with("jpeg") || rest.starts_with("jpg") {
        "image/jpeg"
    } else if rest.starts_with("gif") {
        "image/gif"
    } else if rest.starts_with("webp") {
        "image/webp"
    } else if rest.starts_with("svg") {
        "image/svg+xml"
    } else {
        "image/png"
    }
}

/// A long run of valid base64 is assumed to be encoded image bytes
fn looks_like_base64_image(text: &str) -> bool {
    text.len() >= IMAGE_BASE64_MIN_LEN
        && !text.contains(char::is_whitespace)
        && BASE64.decode(text).is_ok()
}

fn json_text(value: &Value) -> Content {
    Content::text(value.to_string())
}
