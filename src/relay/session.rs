// ABOUTME: Session registry, peer bookkeeping, and the pending-route table
// ABOUTME: Owns all relay state mutations behind a single serialization point
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

//! Session and peer state management
//!
//! [`SessionManager`] is the relay's single serialization point: every
//! mutation of sessions, peers, or the pending-route table takes the one
//! registry lock, including timeout callbacks, so a provider response
//! racing its own timeout resolves exactly once.
//!
//! Push channels are represented by unbounded senders; one SSE task per
//! peer drains the matching receiver, which keeps writes per channel
//! single-writer and frames ordered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{RelayError, RelayResult};
use crate::jsonrpc::{id_key, JsonRpcNotification, JsonRpcResponse};
use crate::schema::{SessionSummary, ToolDescriptor};

/// Role a peer declared at attach time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Publishes a tool catalogue and executes calls
    Provider,
    /// Discovers tools and invokes them
    Caller,
}

impl PeerRole {
    /// Parse the `role` query parameter
    ///
    /// # Errors
    ///
    /// Returns kind `Validation` for anything but `provider`/`caller`.
    pub fn parse(raw: &str) -> RelayResult<Self> {
        match raw {
            "provider" => Ok(Self::Provider),
            "caller" => Ok(Self::Caller),
            other => Err(RelayError::validation(format!(
                "Invalid role: {other} (expected provider or caller)"
            ))),
        }
    }

    /// Wire spelling of the role
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Caller => "caller",
        }
    }
}

/// A registered peer and its push-channel sender
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer_id: String,
    pub role: PeerRole,
    pub session_id: String,
    sender: mpsc::UnboundedSender<String>,
}

impl PeerRecord {
    fn push(&self, frame: String) {
        // A failed send means the SSE task already went away; the drop
        // guard will run disconnect shortly.
        if self.sender.send(frame).is_err() {
            debug!(peer_id = %self.peer_id, "push channel already closed");
        }
    }
}

/// A named meeting point between one provider and zero-or-more callers
#[derive(Debug)]
struct Session {
    provider: Option<String>,
    callers: Vec<String>,
    tools: Vec<ToolDescriptor>,
    created_at: DateTime<Utc>,
}

impl Session {
    fn new() -> Self {
        Self {
            provider: None,
            callers: Vec::new(),
            tools: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn is_idle(&self) -> bool {
        self.provider.is_none() && self.callers.is_empty()
    }
}

/// Relay-side record pairing a forwarded request with its originating caller
#[derive(Debug)]
pub struct PendingRoute {
    pub session_id: String,
    pub caller_peer_id: String,
    pub original_id: Value,
    pub method: String,
    pub enqueued_at: Instant,
}

#[derive(Debug, Default)]
struct Registry {
    sessions: HashMap<String, Session>,
    peers: HashMap<String, PeerRecord>,
    pending: HashMap<String, PendingRoute>,
}

impl Registry {
    /// Drop a session once neither a provider nor any caller remains
    fn reap_if_idle(&mut self, session_id: &str) {
        if self
            .sessions
            .get(session_id)
            .is_some_and(Session::is_idle)
        {
            info!(session_id, "destroying idle session");
            self.sessions.remove(session_id);
        }
    }

    fn session_summaries(&self) -> Vec<SessionSummary> {
        self.sessions
            .iter()
            .map(|(id, session)| SessionSummary {
                id: id.clone(),
                has_provider: session.provider.is_some(),
                caller_count: session.callers.len(),
                tool_count: session.tools.len(),
                created_at: session.created_at,
            })
            .collect()
    }
}

/// Central manager for sessions, peers, and pending routes
pub struct SessionManager {
    inner: Mutex<Registry>,
    next_internal_id: AtomicU64,
    request_timeout: Duration,
}

impl SessionManager {
    /// Create a manager with the given forward-timeout duration
    #[must_use]
    pub fn new(request_timeout_ms: u64) -> Self {
        Self {
            inner: Mutex::new(Registry::default()),
            next_internal_id: AtomicU64::new(0),
            request_timeout: Duration::from_millis(request_timeout_ms),
        }
    }

    /// Allocate a relay-internal id
    ///
    /// One monotonic generator serves every session, so internal ids never
    /// collide across sessions.
    fn allocate_internal_id(&self) -> String {
        let n = self.next_internal_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("relay-{n}")
    }

    /// Register a peer's push channel
    ///
    /// Creates the session lazily, installs the sender, and queues the
    /// `connected` notification as the first frame. Callers additionally
    /// receive an unsolicited response-shaped listing of known sessions.
    /// A second provider displaces the incumbent, which receives a
    /// terminal error notification before its channel closes.
    pub async fn attach(
        &self,
        session_id: &str,
        role: PeerRole,
        sender: mpsc::UnboundedSender<String>,
    ) -> String {
        let peer_id = format!("peer-{}", Uuid::new_v4());
        let mut registry = self.inner.lock().await;

        let session = registry
            .sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| {
                info!(session_id, "creating session");
                Session::new()
            });

        let displaced = match role {
            PeerRole::Provider => session.provider.replace(peer_id.clone()),
            PeerRole::Caller => {
                session.callers.push(peer_id.clone());
                None
            }
        };

        if let Some(old_provider_id) = displaced {
            warn!(
                session_id,
                old_provider_id = %old_provider_id,
                new_provider_id = %peer_id,
                "provider takeover"
            );
            if let Some(old) = registry.peers.remove(&old_provider_id) {
                push_notification(
                    &old,
                    "session/error",
                    json!({
                        "code": RelayError::session("").json_rpc_code(),
                        "message": "another provider connected",
                        "sessionId": session_id,
                    }),
                );
                // Dropping the sender ends the old SSE stream after the
                // terminal error frame drains.
            }
        }

        let record = PeerRecord {
            peer_id: peer_id.clone(),
            role,
            session_id: session_id.to_owned(),
            sender,
        };

        push_notification(
            &record,
            "connected",
            json!({
                "peerId": peer_id,
                "sessionId": session_id,
                "role": role.as_str(),
            }),
        );

        if role == PeerRole::Caller {
            let listing = JsonRpcResponse::success(
                Value::String("sessions".to_owned()),
                json!({ "sessions": registry.session_summaries() }),
            );
            push_response(&record, &listing);
        }

        registry.peers.insert(peer_id.clone(), record);
        info!(session_id, peer_id = %peer_id, role = role.as_str(), "peer attached");
        peer_id
    }

    /// Tear down a peer after its push channel closed
    ///
    /// Idempotent: a peer displaced by takeover is already gone by the
    /// time its stream's drop guard fires.
    pub async fn disconnect(&self, peer_id: &str) {
        let mut registry = self.inner.lock().await;

        let Some(record) = registry.peers.remove(peer_id) else {
            return;
        };
        let session_id = record.session_id.clone();
        info!(session_id = %session_id, peer_id, role = record.role.as_str(), "peer disconnected");

        match record.role {
            PeerRole::Provider => {
                let callers = match registry.sessions.get_mut(&session_id) {
                    Some(session) => {
                        if session.provider.as_deref() == Some(peer_id) {
                            session.provider = None;
                        }
                        session.callers.clone()
                    }
                    None => Vec::new(),
                };
                for caller_id in callers {
                    if let Some(caller) = registry.peers.get(&caller_id) {
                        push_notification(
                            caller,
                            "provider/disconnected",
                            json!({ "sessionId": session_id }),
                        );
                    }
                }
                // In-flight requests waiting on this provider fail with a
                // connection error rather than dangling until timeout.
                let orphaned: Vec<String> = registry
                    .pending
                    .iter()
                    .filter(|(_, route)| route.session_id == session_id)
                    .map(|(internal_id, _)| internal_id.clone())
                    .collect();
                for internal_id in orphaned {
                    if let Some(route) = registry.pending.remove(&internal_id) {
                        if let Some(caller) = registry.peers.get(&route.caller_peer_id) {
                            let error = RelayError::connection("provider disconnected");
                            push_response(
                                caller,
                                &JsonRpcResponse::from_relay_error(route.original_id, &error),
                            );
                        }
                    }
                }
            }
            PeerRole::Caller => {
                if let Some(session) = registry.sessions.get_mut(&session_id) {
                    session.callers.retain(|id| id != peer_id);
                }
                registry
                    .pending
                    .retain(|_, route| route.caller_peer_id != peer_id);
            }
        }

        registry.reap_if_idle(&session_id);
    }

    /// Replace a session's tool catalogue
    ///
    /// Only the session's current provider may mutate the catalogue;
    /// callers read snapshots. Every caller is notified with
    /// `tools/updated` in the same serialization step.
    ///
    /// # Errors
    ///
    /// Kind `Session` when the session is unknown, kind `Permission` when
    /// the sender is not the session's provider.
    pub async fn register_tools(
        &self,
        session_id: &str,
        sender_peer_id: &str,
        tools: Vec<ToolDescriptor>,
    ) -> RelayResult<usize> {
        let mut registry = self.inner.lock().await;

        let session = registry
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RelayError::session(format!("Session not found: {session_id}")))?;

        if session.provider.as_deref() != Some(sender_peer_id) {
            return Err(RelayError::permission(
                "only the session provider may register tools",
            ));
        }

        let count = tools.len();
        session.tools = tools.clone();
        let callers = session.callers.clone();
        debug!(session_id, count, "tool catalogue replaced");

        for caller_id in callers {
            if let Some(caller) = registry.peers.get(&caller_id) {
                push_notification(caller, "tools/updated", json!({ "tools": tools }));
            }
        }

        Ok(count)
    }

    /// Snapshot a session's cached tool catalogue
    pub async fn cached_tools(&self, session_id: &str) -> Vec<ToolDescriptor> {
        let registry = self.inner.lock().await;
        registry
            .sessions
            .get(session_id)
            .map(|session| session.tools.clone())
            .unwrap_or_default()
    }

    /// Whether the session currently has a provider attached
    pub async fn has_provider(&self, session_id: &str) -> bool {
        let registry = self.inner.lock().await;
        registry
            .sessions
            .get(session_id)
            .is_some_and(|session| session.provider.is_some())
    }

    /// Forward a caller request to the session's provider under a rewritten id
    ///
    /// Allocates an internal id, records the pending route, sends the
    /// rewritten request down the provider's channel, and arms the forward
    /// timer.
    ///
    /// # Errors
    ///
    /// Kind `Session` when the session is unknown or has no provider.
    pub async fn forward_to_provider(
        self: &Arc<Self>,
        session_id: &str,
        caller_peer_id: &str,
        request: crate::jsonrpc::JsonRpcRequest,
    ) -> RelayResult<()> {
        let internal_id = {
            let mut registry = self.inner.lock().await;

            let session = registry
                .sessions
                .get(session_id)
                .ok_or_else(|| RelayError::session(format!("Session not found: {session_id}")))?;
            let provider_id = session
                .provider
                .clone()
                .ok_or_else(|| {
                    RelayError::session(format!("No provider connected for session {session_id}"))
                })?;

            let internal_id = self.allocate_internal_id();
            let original_id = request.id.clone();
            let method = request.method.clone();
            let rewritten = request.with_id(Value::String(internal_id.clone()));
            let frame = serde_json::to_string(&rewritten)
                .map_err(|e| RelayError::internal(format!("serialization failed: {e}")))?;

            registry.pending.insert(
                internal_id.clone(),
                PendingRoute {
                    session_id: session_id.to_owned(),
                    caller_peer_id: caller_peer_id.to_owned(),
                    original_id,
                    method,
                    enqueued_at: Instant::now(),
                },
            );

            if let Some(provider) = registry.peers.get(&provider_id) {
                provider.push(frame);
            }
            internal_id
        };

        let manager = Arc::clone(self);
        let timeout = self.request_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            manager.expire_pending(&internal_id).await;
        });

        Ok(())
    }

    /// Resolve a pending route when its forward timer fires
    ///
    /// A route already resolved by a provider response is gone from the
    /// table, making the race exactly-once. `tools/list` timeouts degrade
    /// to the cached catalogue instead of an error.
    pub async fn expire_pending(&self, internal_id: &str) {
        let mut registry = self.inner.lock().await;

        let Some(route) = registry.pending.remove(internal_id) else {
            return;
        };
        warn!(
            internal_id,
            session_id = %route.session_id,
            method = %route.method,
            elapsed_ms = route.enqueued_at.elapsed().as_millis() as u64,
            "forward timeout"
        );

        let cached = registry
            .sessions
            .get(&route.session_id)
            .map(|session| session.tools.clone());

        let Some(caller) = registry.peers.get(&route.caller_peer_id) else {
            return;
        };

        let response = if route.method == "tools/list" {
            // Availability fallback: a stale catalogue beats no answer.
            JsonRpcResponse::success(
                route.original_id,
                json!({ "tools": cached.unwrap_or_default() }),
            )
        } else {
            let error = RelayError::timeout(format!(
                "Request timed out after {}ms",
                self.request_timeout.as_millis()
            ));
            JsonRpcResponse::from_relay_error(route.original_id, &error)
        };
        push_response(caller, &response);
    }

    /// Route a provider response back to the caller that originated it
    ///
    /// Looks up the pending route by the relay-internal id, restores the
    /// caller's original id, and pushes the response down the caller's
    /// channel. Unknown ids and departed callers are dropped.
    pub async fn complete_pending(&self, mut response: JsonRpcResponse) {
        let mut registry = self.inner.lock().await;

        let key = id_key(&response.id);
        let Some(route) = registry.pending.remove(&key) else {
            debug!(id = %key, "dropping response with no pending route");
            return;
        };

        let Some(caller) = registry.peers.get(&route.caller_peer_id) else {
            debug!(
                caller_peer_id = %route.caller_peer_id,
                "dropping response for departed caller"
            );
            return;
        };

        response.id = route.original_id;
        push_response(caller, &response);
    }

    /// Adopt a caller into a target session's caller map
    ///
    /// Returns the target's tool snapshot. The caller's previous session
    /// is reaped if the move leaves it idle.
    ///
    /// # Errors
    ///
    /// Kind `Session` when the target session does not exist.
    pub async fn join_session(
        &self,
        caller_peer_id: &str,
        target_session_id: &str,
    ) -> RelayResult<Vec<ToolDescriptor>> {
        let mut registry = self.inner.lock().await;

        if !registry.sessions.contains_key(target_session_id) {
            return Err(RelayError::session(format!(
                "Session not found: {target_session_id}"
            )));
        }

        let Some(record) = registry.peers.get(caller_peer_id).cloned() else {
            return Err(RelayError::session(format!(
                "Unknown peer: {caller_peer_id}"
            )));
        };
        if record.role != PeerRole::Caller {
            return Err(RelayError::permission("only callers may join sessions"));
        }

        let previous_session_id = record.session_id.clone();
        if previous_session_id != target_session_id {
            if let Some(previous) = registry.sessions.get_mut(&previous_session_id) {
                previous.callers.retain(|id| id != caller_peer_id);
            }
            if let Some(target) = registry.sessions.get_mut(target_session_id) {
                target.callers.push(caller_peer_id.to_owned());
            }
            if let Some(record) = registry.peers.get_mut(caller_peer_id) {
                record.session_id = target_session_id.to_owned();
            }
            registry.reap_if_idle(&previous_session_id);
        }

        info!(
            caller_peer_id,
            from = %previous_session_id,
            to = %target_session_id,
            "caller joined session"
        );

        Ok(registry
            .sessions
            .get(target_session_id)
            .map(|session| session.tools.clone())
            .unwrap_or_default())
    }

    /// Identify the sender of an ingested message
    ///
    /// The explicit `peerId` query parameter wins; otherwise the session's
    /// sole peer is assumed, preferring the single caller when both a
    /// provider and exactly one caller are present (providers address the
    /// relay only with responses, which never reach this path).
    pub async fn resolve_sender(
        &self,
        session_id: &str,
        peer_id: Option<&str>,
    ) -> Option<PeerRecord> {
        let registry = self.inner.lock().await;

        if let Some(peer_id) = peer_id {
            return registry.peers.get(peer_id).cloned();
        }

        let session = registry.sessions.get(session_id)?;
        if session.callers.len() == 1 {
            return registry.peers.get(&session.callers[0]).cloned();
        }
        if session.callers.is_empty() {
            if let Some(provider_id) = &session.provider {
                return registry.peers.get(provider_id).cloned();
            }
        }
        None
    }

    /// Push a response frame to a peer
    pub async fn push_response(&self, peer_id: &str, response: &JsonRpcResponse) {
        let registry = self.inner.lock().await;
        if let Some(record) = registry.peers.get(peer_id) {
            push_response(record, response);
        }
    }

    /// Session summaries for the listing probe and attach-time discovery
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let registry = self.inner.lock().await;
        registry.session_summaries()
    }

    /// Current session and peer counts for the health probe
    pub async fn counts(&self) -> (usize, usize) {
        let registry = self.inner.lock().await;
        (registry.sessions.len(), registry.peers.len())
    }

    /// Number of outstanding pending routes (test observability)
    pub async fn pending_count(&self) -> usize {
        let registry = self.inner.lock().await;
        registry.pending.len()
    }
}

fn push_notification(record: &PeerRecord, method: &str, params: Value) {
    let notification = JsonRpcNotification::new(method, Some(params));
    match serde_json::to_string(&notification) {
        Ok(frame) => record.push(frame),
        Err(e) => warn!(peer_id = %record.peer_id, error = %e, "notification serialization failed"),
    }
}

fn push_response(record: &PeerRecord, response: &JsonRpcResponse) {
    match serde_json::to_string(response) {
        Ok(frame) => record.push(frame),
        Err(e) => warn!(peer_id = %record.peer_id, error = %e, "response serialization failed"),
    }
}
