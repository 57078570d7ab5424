// ABOUTME: Centralized error handling and error types for the Switchboard relay
// ABOUTME: Defines the kind-discriminated error taxonomy shared by relay and peers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

//! # Unified Error Handling System
//!
//! A single error type carried across the relay and the peer multiplexer.
//! Errors are discriminated by [`ErrorKind`] and compared by kind, never by
//! identity. Each kind maps to a stable JSON-RPC integer code (the reserved
//! range plus the relay's application range) and, for the few places where
//! errors surface as HTTP status codes (ingest/attach shape violations), to
//! an HTTP status.

use std::fmt::{self, Display};
use std::io;

use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::jsonrpc::JsonRpcError;

/// Standard error kinds used throughout the relay and peer clients
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Request body was not valid JSON
    Parse,
    /// Decoded value is not a JSON-RPC 2.0 message
    InvalidRequest,
    /// No handler registered for the requested method
    MethodNotFound,
    /// Method parameters are missing or malformed
    InvalidParams,
    /// Internal relay or peer failure
    Internal,
    /// Push channel or HTTP transport failure
    Connection,
    /// A request did not complete within its deadline
    Timeout,
    /// Session missing, or no provider attached to it
    Session,
    /// A tool handler failed while executing
    Execution,
    /// Named tool is not in the provider's catalogue
    ToolNotFound,
    /// Input failed validation
    Validation,
    /// Operation not permitted for this peer
    Permission,
}

impl ErrorKind {
    /// Get the stable JSON-RPC integer code for this kind
    ///
    /// Reserved JSON-RPC codes for the protocol kinds, `-32000..` for the
    /// relay's application range.
    #[must_use]
    pub const fn json_rpc_code(self) -> i32 {
        match self {
            Self::Parse => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::Internal => -32603,
            Self::Connection => -32000,
            Self::Timeout => -32001,
            Self::Session => -32002,
            Self::Execution => -32003,
            Self::ToolNotFound => -32004,
            Self::Validation => -32005,
            Self::Permission => -32006,
        }
    }

    /// Resolve a kind from a JSON-RPC integer code
    #[must_use]
    pub const fn from_json_rpc_code(code: i32) -> Option<Self> {
        match code {
            -32700 => Some(Self::Parse),
            -32600 => Some(Self::InvalidRequest),
            -32601 => Some(Self::MethodNotFound),
            -32602 => Some(Self::InvalidParams),
            -32603 => Some(Self::Internal),
            -32000 => Some(Self::Connection),
            -32001 => Some(Self::Timeout),
            -32002 => Some(Self::Session),
            -32003 => Some(Self::Execution),
            -32004 => Some(Self::ToolNotFound),
            -32005 => Some(Self::Validation),
            -32006 => Some(Self::Permission),
            _ => None,
        }
    }

    /// Get the HTTP status code used when this error surfaces at an endpoint
    ///
    /// Only shape violations at the ingest/attach endpoints ever surface as
    /// HTTP statuses; semantic failures ride in message `error` fields.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::Parse | Self::InvalidRequest | Self::InvalidParams | Self::Validation => 400,
            Self::Permission => 403,
            Self::MethodNotFound | Self::Session | Self::ToolNotFound => 404,
            Self::Timeout => 408,
            Self::Internal | Self::Connection | Self::Execution => 500,
        }
    }

    /// Get a user-friendly description of this kind
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Parse => "Parse error",
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::Internal => "Internal error",
            Self::Connection => "Connection error",
            Self::Timeout => "Request timed out",
            Self::Session => "Session error",
            Self::Execution => "Execution error",
            Self::ToolNotFound => "Tool not found",
            Self::Validation => "Validation error",
            Self::Permission => "Permission denied",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Error type carried across the relay and peer multiplexer
#[derive(Debug, Clone, ThisError)]
#[error("{kind}: {message}")]
pub struct RelayError {
    /// Error kind discriminator
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
}

impl RelayError {
    /// Create a new error with the given kind and message
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Get the JSON-RPC integer code for this error
    #[must_use]
    pub const fn json_rpc_code(&self) -> i32 {
        self.kind.json_rpc_code()
    }

    /// Convert into the wire-level JSON-RPC error object
    #[must_use]
    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.kind.json_rpc_code(),
            message: self.message.clone(),
            data: None,
        }
    }

    /// Reconstruct a typed error from a wire-level JSON-RPC error object
    #[must_use]
    pub fn from_json_rpc_error(error: &JsonRpcError) -> Self {
        let kind = ErrorKind::from_json_rpc_code(error.code).unwrap_or(ErrorKind::Internal);
        Self::new(kind, error.message.clone())
    }
}

/// Convenience constructors for common errors
impl RelayError {
    /// Body was not valid JSON
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    /// Decoded value is not a JSON-RPC 2.0 message
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    /// No handler registered for the method
    #[must_use]
    pub fn method_not_found(method: impl Display) -> Self {
        Self::new(
            ErrorKind::MethodNotFound,
            format!("Method not found: {method}"),
        )
    }

    /// Parameters missing or malformed
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    /// Internal failure
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Transport failure
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    /// Deadline exceeded
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Session missing or has no provider
    #[must_use]
    pub fn session(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Session, message)
    }

    /// Tool handler failed
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message)
    }

    /// Tool not in the catalogue
    #[must_use]
    pub fn tool_not_found(name: impl Display) -> Self {
        Self::new(ErrorKind::ToolNotFound, format!("Tool not found: {name}"))
    }

    /// Input failed validation
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Operation not permitted
    #[must_use]
    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, message)
    }
}

/// Convert `RelayError` to an axum `Response` for endpoint shape errors
///
/// Ingest and attach respond `{"error": <msg>}` with a 4xx on shape
/// violations; everything else flows through push channels.
impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        use axum::http::StatusCode;
        use axum::Json;

        let status = StatusCode::from_u16(self.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

/// Result type alias for convenience
pub type RelayResult<T> = Result<T, RelayError>;

impl From<io::Error> for RelayError {
    fn from(error: io::Error) -> Self {
        Self::new(ErrorKind::Connection, format!("IO error: {error}"))
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(ErrorKind::Parse, format!("JSON error: {error}"))
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::new(ErrorKind::Timeout, format!("HTTP timeout: {error}"))
        } else {
            Self::new(ErrorKind::Connection, format!("HTTP error: {error}"))
        }
    }
}
