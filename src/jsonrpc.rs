// ABOUTME: JSON-RPC 2.0 message set shared by the relay and peer clients
// ABOUTME: Provides request, response, and notification types with wire classification
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

//! # JSON-RPC 2.0 Foundation
//!
//! One implementation of the wire message set used on both sides of the
//! relay. Messages are classified by shape rather than by a tag field:
//!
//! - has `id` and `method` → request
//! - has `id` without `method` → response
//! - has `method` without `id` → notification
//!
//! The wire format is UTF-8 JSON with a mandatory `jsonrpc: "2.0"` field.
//! Batch forms are rejected.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{RelayError, RelayResult};

/// JSON-RPC 2.0 version string
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Method name to invoke
    pub method: String,

    /// Optional parameters for the method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Request identifier for correlation (string or integer)
    pub id: Value,
}

/// JSON-RPC 2.0 Response
///
/// Exactly one of `result`/`error` is present on well-formed responses.
/// Provider tool failures are the one sanctioned exception: they carry an
/// `isError` result alongside a paired `error` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Result of the method call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,

    /// Request identifier for correlation
    pub id: Value,
}

/// JSON-RPC 2.0 Notification (no id, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Method name
    pub method: String,

    /// Optional parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 Error Object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (stable registry in [`crate::errors::ErrorKind`])
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new request with a specific id
    #[must_use]
    pub fn new(id: Value, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Replace the id, returning the rewritten request
    ///
    /// Used at the relay's routing boundary when substituting a
    /// caller-supplied id with a relay-internal one.
    #[must_use]
    pub fn with_id(mut self, id: Value) -> Self {
        self.id = id;
        self
    }
}

impl JsonRpcResponse {
    /// Create a success response
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response
    #[must_use]
    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    /// Create an error response from a typed relay error
    #[must_use]
    pub fn from_relay_error(id: Value, error: &RelayError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result: None,
            error: Some(error.to_json_rpc_error()),
            id,
        }
    }

    /// Check if this is a success response
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }

    /// Check if this is an error response
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl JsonRpcNotification {
    /// Create a new notification
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
        }
    }
}

/// A classified wire message
#[derive(Debug, Clone)]
pub enum Message {
    /// Request: has both `id` and `method`
    Request(JsonRpcRequest),
    /// Response: has `id` without `method`
    Response(JsonRpcResponse),
    /// Notification: has `method` without `id`
    Notification(JsonRpcNotification),
}

impl Message {
    /// Parse and classify a single message from raw bytes
    ///
    /// # Errors
    ///
    /// Returns kind `Parse` when the bytes are not JSON, and kind
    /// `InvalidRequest` when the decoded value is not a JSON-RPC 2.0
    /// message (wrong version, batch form, or neither `id` nor `method`).
    pub fn parse(bytes: &[u8]) -> RelayResult<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| RelayError::parse(format!("Invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Classify an already-decoded JSON value
    ///
    /// # Errors
    ///
    /// Returns kind `InvalidRequest` when the value is not a single
    /// JSON-RPC 2.0 message.
    pub fn from_value(value: Value) -> RelayResult<Self> {
        if value.is_array() {
            return Err(RelayError::invalid_request("Batch requests are not supported"));
        }

        let Some(object) = value.as_object() else {
            return Err(RelayError::invalid_request("Message must be a JSON object"));
        };

        if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(RelayError::invalid_request(
                "Missing or invalid jsonrpc version field",
            ));
        }

        let has_id = object.get("id").is_some_and(|id| !id.is_null());
        let has_method = object.get("method").is_some();

        match (has_id, has_method) {
            (true, true) => {
                let request: JsonRpcRequest = serde_json::from_value(value)
                    .map_err(|e| RelayError::invalid_request(format!("Malformed request: {e}")))?;
                if !is_valid_id(&request.id) {
                    return Err(RelayError::invalid_request(
                        "Request id must be a string or integer",
                    ));
                }
                Ok(Self::Request(request))
            }
            (true, false) => {
                let response: JsonRpcResponse = serde_json::from_value(value)
                    .map_err(|e| RelayError::invalid_request(format!("Malformed response: {e}")))?;
                Ok(Self::Response(response))
            }
            (false, true) => {
                let notification: JsonRpcNotification = serde_json::from_value(value)
                    .map_err(|e| {
                        RelayError::invalid_request(format!("Malformed notification: {e}"))
                    })?;
                Ok(Self::Notification(notification))
            }
            (false, false) => Err(RelayError::invalid_request(
                "Message has neither id nor method",
            )),
        }
    }

    /// Serialize back to the wire form
    ///
    /// # Errors
    ///
    /// Returns kind `Internal` if serialization fails (should not happen
    /// for values built through this module).
    pub fn to_json(&self) -> RelayResult<String> {
        let serialized = match self {
            Self::Request(request) => serde_json::to_string(request),
            Self::Response(response) => serde_json::to_string(response),
            Self::Notification(notification) => serde_json::to_string(notification),
        };
        serialized.map_err(|e| RelayError::internal(format!("Serialization failed: {e}")))
    }

    /// The method name, for requests and notifications
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(request) => Some(&request.method),
            Self::Notification(notification) => Some(&notification.method),
            Self::Response(_) => None,
        }
    }
}

/// Ids are opaque to the relay but constrained to strings and integers
fn is_valid_id(id: &Value) -> bool {
    match id {
        Value::String(_) => true,
        Value::Number(n) => n.is_i64() || n.is_u64(),
        _ => false,
    }
}

/// Render a message id as a stable map key for pending-table lookups
#[must_use]
pub fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Peer-side message id generator
///
/// Produces `peer-<nonce>-<counter>` ids: a process-local random nonce
/// joined with a monotonic counter, so ids from concurrently attached peers
/// never collide.
#[derive(Debug)]
pub struct IdGenerator {
    nonce: String,
    counter: AtomicU64,
}

impl IdGenerator {
    /// Create a generator with a fresh random nonce
    #[must_use]
    pub fn new() -> Self {
        let mut nonce = String::with_capacity(8);
        let raw: u32 = rand::thread_rng().gen();
        let _ = write!(nonce, "{raw:08x}");
        Self {
            nonce,
            counter: AtomicU64::new(0),
        }
    }

    /// Allocate the next id
    pub fn next_id(&self) -> Value {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Value::String(format!("peer-{}-{n}", self.nonce))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
