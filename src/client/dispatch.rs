// ABOUTME: Inbound frame classification and handler-table dispatch for peers
// ABOUTME: Provides the built-in provider handlers for tools/call and tools/list
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

//! Inbound dispatch
//!
//! Frames arriving on the push channel are classified and fanned out:
//! responses resolve pending locals by id, requests run through the
//! handler table (with provider built-ins for `tools/call` and
//! `tools/list`), notifications drive the connection lifecycle and the
//! observation stream. Handler failures become error responses; they
//! never escape the dispatch loop.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::errors::RelayError;
use crate::jsonrpc::{id_key, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message};
use crate::relay::session::PeerRole;
use crate::schema::{ToolCallParams, ToolResult};

use super::events::ClientEvent;
use super::normalize::normalize_result;
use super::{post_json, ClientInner};

/// Process one push-channel frame
pub(crate) async fn handle_frame(inner: &Arc<ClientInner>, payload: &str) {
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(error) => {
            warn!(error = %error, "dropping unparseable frame");
            return;
        }
    };
    inner.observers.emit(&ClientEvent::Message(value.clone()));

    let message = match Message::from_value(value) {
        Ok(message) => message,
        Err(error) => {
            debug!(error = %error, "dropping unclassifiable frame");
            return;
        }
    };

    match message {
        Message::Response(response) => resolve_pending(inner, response).await,
        Message::Notification(notification) => handle_notification(inner, notification).await,
        Message::Request(request) => {
            // Handlers are free to block; responses still post in their
            // own tasks so frame processing keeps its arrival order.
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                let response = dispatch_request(&inner, request).await;
                match serde_json::to_value(&response) {
                    Ok(body) => {
                        if let Err(error) = post_json(&inner, &body).await {
                            warn!(error = %error, "failed to post handler response");
                        }
                    }
                    Err(error) => warn!(error = %error, "handler response serialization failed"),
                }
            });
        }
    }
}

/// Match a response against the pending-local table
async fn resolve_pending(inner: &Arc<ClientInner>, response: JsonRpcResponse) {
    let key = id_key(&response.id);
    let sender = inner.pending.lock().await.remove(&key);
    match sender {
        Some(sender) => {
            let _ = sender.send(Ok(response));
        }
        None => debug!(id = %key, "dropping unmatched response"),
    }
}

async fn handle_notification(inner: &Arc<ClientInner>, notification: JsonRpcNotification) {
    match notification.method.as_str() {
        "connected" => {
            let params = notification.params.unwrap_or_default();
            let peer_id = params
                .get("peerId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            let session_id = params
                .get("sessionId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            if let Some(signal) = inner.connected_signal.lock().await.take() {
                let _ = signal.send((peer_id, session_id));
            }
        }
        "session/error" => {
            // Terminal: the relay closes this channel next, and a
            // displaced provider must not reconnect into a takeover loop.
            inner.terminal.store(true, Ordering::SeqCst);
            let params = notification.params.unwrap_or_default();
            let code = params
                .get("code")
                .and_then(Value::as_i64)
                .and_then(|code| i32::try_from(code).ok())
                .unwrap_or_else(|| RelayError::session("").json_rpc_code());
            let message = params
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("session error")
                .to_owned();
            let kind = crate::errors::ErrorKind::from_json_rpc_code(code)
                .unwrap_or(crate::errors::ErrorKind::Session);
            inner
                .observers
                .emit(&ClientEvent::Error(RelayError::new(kind, message)));
        }
        other => {
            // tools/updated, provider/disconnected, and future methods
            // already reached observers through the message event.
            debug!(method = other, "notification observed");
        }
    }
}

/// Route a forwarded request through the handler table
async fn dispatch_request(inner: &Arc<ClientInner>, request: JsonRpcRequest) -> JsonRpcResponse {
    let handler = inner.handlers.lock().await.get(&request.method).cloned();
    if let Some(handler) = handler {
        let params = request.params.unwrap_or(Value::Null);
        return match handler(params).await {
            Ok(value) => JsonRpcResponse::success(
                request.id,
                json!({ "content": normalize_result(value) }),
            ),
            Err(error) => JsonRpcResponse::from_relay_error(request.id, &error),
        };
    }

    if inner.role == PeerRole::Provider {
        match request.method.as_str() {
            "tools/call" => return handle_tool_call(inner, request).await,
            "tools/list" => {
                let tools = inner.tools.lock().await.clone();
                return JsonRpcResponse::success(request.id, json!({ "tools": tools }));
            }
            _ => {}
        }
    }

    let error = RelayError::method_not_found(&request.method);
    JsonRpcResponse::from_relay_error(request.id, &error)
}

/// Built-in `tools/call` executor dispatch
///
/// Failures keep the response correlatable as a result (`isError` with a
/// text item) while also carrying the paired `error` field with the
/// execution code.
async fn handle_tool_call(inner: &Arc<ClientInner>, request: JsonRpcRequest) -> JsonRpcResponse {
    let params: ToolCallParams =
        match serde_json::from_value(request.params.unwrap_or_else(|| json!({}))) {
            Ok(params) => params,
            Err(error) => {
                let error = RelayError::invalid_params(format!("Malformed tool call: {error}"));
                return JsonRpcResponse::from_relay_error(request.id, &error);
            }
        };

    inner.observers.emit(&ClientEvent::ToolCall {
        name: params.name.clone(),
        arguments: params
            .arguments
            .clone()
            .map_or(Value::Null, Value::Object),
    });

    let executor = inner.executors.lock().await.get(&params.name).cloned();
    let Some(executor) = executor else {
        return tool_failure_response(request.id, &RelayError::tool_not_found(&params.name));
    };

    match executor(params.arguments.unwrap_or_default()).await {
        Ok(value) => {
            let result = ToolResult::success(normalize_result(value));
            match serde_json::to_value(&result) {
                Ok(result) => JsonRpcResponse::success(request.id, result),
                Err(error) => JsonRpcResponse::from_relay_error(
                    request.id,
                    &RelayError::internal(format!("result serialization failed: {error}")),
                ),
            }
        }
        Err(error) => tool_failure_response(request.id, &error),
    }
}

/// The dual failure shape: `isError` result plus paired `error` field
fn tool_failure_response(id: Value, error: &RelayError) -> JsonRpcResponse {
    let result = ToolResult::failure(error.message.clone());
    JsonRpcResponse {
        jsonrpc: crate::jsonrpc::JSONRPC_VERSION.to_owned(),
        result: serde_json::to_value(&result).ok(),
        error: Some(error.to_json_rpc_error()),
        id,
    }
}
