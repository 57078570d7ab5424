// ABOUTME: Message routing matrix mapping ingested messages to relay actions
// ABOUTME: Handles tool registration, discovery, call forwarding, joins, and response return
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

//! Ingest-side message routing
//!
//! The ingest endpoint acknowledges POSTs before semantic processing; this
//! module is the processing. Every semantic result, including errors, flows
//! down the sender's push channel as a response or notification carrying
//! the sender's original message id.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::errors::RelayError;
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse, Message};
use crate::relay::session::{PeerRecord, PeerRole, SessionManager};
use crate::schema::ToolDescriptor;

/// Apply the routing matrix to one ingested message
///
/// `session_id` and `peer_id` come from the ingest query string. A caller
/// may address either its own session or, after `session/join`, the
/// provider's session id; the sender's registered session wins for
/// routing, so both shapes behave identically.
pub async fn process_message(
    manager: &Arc<SessionManager>,
    session_id: &str,
    peer_id: Option<&str>,
    message: Message,
) {
    match message {
        Message::Response(response) => {
            // Provider answering a forwarded request: restore the
            // caller's original id and push it back down.
            manager.complete_pending(response).await;
        }
        Message::Request(request) => {
            let Some(sender) = manager.resolve_sender(session_id, peer_id).await else {
                warn!(
                    session_id,
                    peer_id = peer_id.unwrap_or("<none>"),
                    method = %request.method,
                    "dropping request from unknown sender"
                );
                return;
            };
            route_request(manager, &sender, request).await;
        }
        Message::Notification(notification) => {
            debug!(
                session_id,
                method = %notification.method,
                "dropping unroutable notification"
            );
        }
    }
}

async fn route_request(manager: &Arc<SessionManager>, sender: &PeerRecord, request: JsonRpcRequest) {
    match request.method.as_str() {
        "tools/register" => handle_register(manager, sender, request).await,
        "tools/list" => handle_list(manager, sender, request).await,
        "tools/call" => handle_call(manager, sender, request).await,
        "session/join" => handle_join(manager, sender, request).await,
        "ping" => handle_ping(manager, sender, request).await,
        other => {
            warn!(
                peer_id = %sender.peer_id,
                method = other,
                "dropping request with unroutable method"
            );
        }
    }
}

/// `tools/register`: replace the catalogue, notify callers, ack the provider
async fn handle_register(
    manager: &Arc<SessionManager>,
    sender: &PeerRecord,
    request: JsonRpcRequest,
) {
    let tools: Vec<ToolDescriptor> = match request
        .params
        .as_ref()
        .and_then(|params| params.get("tools"))
        .cloned()
        .map(serde_json::from_value)
    {
        Some(Ok(tools)) => tools,
        Some(Err(e)) => {
            let error = RelayError::invalid_params(format!("Malformed tool descriptors: {e}"));
            respond_error(manager, sender, request.id, &error).await;
            return;
        }
        None => {
            let error = RelayError::invalid_params("Missing tools parameter");
            respond_error(manager, sender, request.id, &error).await;
            return;
        }
    };

    match manager
        .register_tools(&sender.session_id, &sender.peer_id, tools)
        .await
    {
        Ok(count) => {
            let response = JsonRpcResponse::success(
                request.id,
                json!({ "success": true, "toolCount": count }),
            );
            manager.push_response(&sender.peer_id, &response).await;
        }
        Err(error) => respond_error(manager, sender, request.id, &error).await,
    }
}

/// `tools/list`: forward to the provider, or answer from the cache
async fn handle_list(manager: &Arc<SessionManager>, sender: &PeerRecord, request: JsonRpcRequest) {
    if sender.role != PeerRole::Caller {
        warn!(peer_id = %sender.peer_id, "dropping tools/list from non-caller");
        return;
    }

    if manager.has_provider(&sender.session_id).await {
        if let Err(error) = manager
            .forward_to_provider(&sender.session_id, &sender.peer_id, request.clone())
            .await
        {
            // Provider raced away between the check and the forward.
            respond_error(manager, sender, request.id, &error).await;
        }
        return;
    }

    let tools = manager.cached_tools(&sender.session_id).await;
    let response = JsonRpcResponse::success(request.id, json!({ "tools": tools }));
    manager.push_response(&sender.peer_id, &response).await;
}

/// `tools/call`: forward to the provider; no provider is a session error
async fn handle_call(manager: &Arc<SessionManager>, sender: &PeerRecord, request: JsonRpcRequest) {
    if sender.role != PeerRole::Caller {
        warn!(peer_id = %sender.peer_id, "dropping tools/call from non-caller");
        return;
    }

    if let Err(error) = manager
        .forward_to_provider(&sender.session_id, &sender.peer_id, request.clone())
        .await
    {
        respond_error(manager, sender, request.id, &error).await;
    }
}

/// `session/join`: adopt the caller into the target session
async fn handle_join(manager: &Arc<SessionManager>, sender: &PeerRecord, request: JsonRpcRequest) {
    let target = request
        .params
        .as_ref()
        .and_then(|params| params.get("sessionId"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    let Some(target) = target else {
        let error = RelayError::invalid_params("Missing sessionId parameter");
        respond_error(manager, sender, request.id, &error).await;
        return;
    };

    match manager.join_session(&sender.peer_id, &target).await {
        Ok(tools) => {
            let response = JsonRpcResponse::success(
                request.id,
                json!({ "success": true, "sessionId": target, "tools": tools }),
            );
            manager.push_response(&sender.peer_id, &response).await;
        }
        Err(error) => respond_error(manager, sender, request.id, &error).await,
    }
}

/// `ping`: answered by the relay itself, for either role
async fn handle_ping(manager: &Arc<SessionManager>, sender: &PeerRecord, request: JsonRpcRequest) {
    let response = JsonRpcResponse::success(
        request.id,
        json!({ "pong": true, "timestamp": Utc::now().to_rfc3339() }),
    );
    manager.push_response(&sender.peer_id, &response).await;
}

async fn respond_error(
    manager: &Arc<SessionManager>,
    sender: &PeerRecord,
    id: Value,
    error: &RelayError,
) {
    let response = JsonRpcResponse::from_relay_error(id, error);
    manager.push_response(&sender.peer_id, &response).await;
}
