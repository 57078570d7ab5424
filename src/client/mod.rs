// ABOUTME: Peer-side request/response multiplexer used by providers and callers
// ABOUTME: Opens the push channel, posts outbound messages, and correlates responses
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

//! # Peer multiplexer
//!
//! [`PeerClient`] mirrors the relay's correlation discipline on the peer
//! side of the asymmetric transport: frames arrive over a long-lived SSE
//! stream, outbound messages leave as unary POSTs, and in-flight requests
//! are paired with their responses by id.
//!
//! Both roles use the same client. Providers register named tool
//! executors and answer forwarded `tools/call`/`tools/list` requests
//! through built-in handlers; callers discover sessions, join one, and
//! invoke tools.

/// Inbound frame dispatch and the built-in provider handlers
pub mod dispatch;

/// Observation points (connect, disconnect, error, message, tool-call)
pub mod events;

/// Coercion of handler return values to content items
pub mod normalize;

/// Line-buffering SSE frame parser
pub mod sse;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::PeerConfig;
use crate::errors::{RelayError, RelayResult};
use crate::jsonrpc::{id_key, IdGenerator, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::relay::session::PeerRole;
use crate::schema::{ToolDescriptor, ToolResult};

use self::events::{ClientEvent, EventKind, EventObservers};
use self::sse::SseLineBuffer;

/// Connection lifecycle of the push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never attached
    Idle,
    /// Attach in progress
    Connecting,
    /// Push channel open
    Connected,
    /// Push channel dropped after being open
    Disconnected,
    /// Waiting out the backoff before the next attach attempt
    Reconnecting,
    /// Closed for good; no further attach is possible
    Terminal,
}

/// Dispatch-table entry: a first-class handler for one method
pub type MethodHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, RelayResult<Value>> + Send + Sync>;

/// Executor-table entry: a named tool body taking its arguments map
pub type ToolExecutor =
    Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, RelayResult<Value>> + Send + Sync>;

pub(crate) struct ClientInner {
    pub(crate) config: PeerConfig,
    pub(crate) role: PeerRole,
    pub(crate) http: reqwest::Client,
    /// Session this peer attaches under
    pub(crate) session_id: String,
    /// Session id used for outbound POSTs; retargeted by `session/join`
    pub(crate) post_session: Mutex<String>,
    pub(crate) peer_id: Mutex<Option<String>>,
    pub(crate) state: Mutex<ConnectionState>,
    /// Set by `disconnect()` and by a terminal takeover error
    pub(crate) terminal: AtomicBool,
    /// Invalidates listeners from superseded connections
    generation: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
    pub(crate) pending: Mutex<HashMap<String, oneshot::Sender<RelayResult<JsonRpcResponse>>>>,
    pub(crate) handlers: Mutex<HashMap<String, MethodHandler>>,
    pub(crate) executors: Mutex<HashMap<String, ToolExecutor>>,
    pub(crate) tools: Mutex<Vec<ToolDescriptor>>,
    pub(crate) observers: EventObservers,
    pub(crate) ids: IdGenerator,
    pub(crate) connected_signal: Mutex<Option<oneshot::Sender<(String, String)>>>,
}

/// Request/response multiplexer over the relay's asymmetric transport
#[derive(Clone)]
pub struct PeerClient {
    inner: Arc<ClientInner>,
}

impl PeerClient {
    /// Create a provider client
    #[must_use]
    pub fn provider(config: PeerConfig) -> Self {
        Self::with_role(config, PeerRole::Provider)
    }

    /// Create a caller client
    #[must_use]
    pub fn caller(config: PeerConfig) -> Self {
        Self::with_role(config, PeerRole::Caller)
    }

    fn with_role(config: PeerConfig, role: PeerRole) -> Self {
        let session_id = config.resolve_session_id();
        Self {
            inner: Arc::new(ClientInner {
                config,
                role,
                http: reqwest::Client::new(),
                session_id: session_id.clone(),
                post_session: Mutex::new(session_id),
                peer_id: Mutex::new(None),
                state: Mutex::new(ConnectionState::Idle),
                terminal: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                listener: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                handlers: Mutex::new(HashMap::new()),
                executors: Mutex::new(HashMap::new()),
                tools: Mutex::new(Vec::new()),
                observers: EventObservers::new(),
                ids: IdGenerator::new(),
                connected_signal: Mutex::new(None),
            }),
        }
    }

    /// Session id this peer attaches under
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Relay-assigned peer id, once attached
    pub async fn peer_id(&self) -> Option<String> {
        self.inner.peer_id.lock().await.clone()
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.lock().await
    }

    /// Subscribe an observation callback
    pub fn on(&self, kind: EventKind, callback: impl Fn(&ClientEvent) + Send + Sync + 'static) {
        self.inner.observers.subscribe(kind, callback);
    }

    /// Open the push channel, retrying with exponential backoff
    ///
    /// Retries `base * 2^(attempt-1)` up to `max_reconnect_attempts` when
    /// `auto_reconnect` is set; a single attempt otherwise. Resolves once
    /// the `connected` notification delivers this peer's id.
    ///
    /// # Errors
    ///
    /// Kind `Connection` or `Timeout` when every attempt fails; the
    /// client is then terminal.
    pub async fn attach(&self) -> RelayResult<()> {
        {
            let mut state = self.inner.state.lock().await;
            match *state {
                ConnectionState::Connected
                | ConnectionState::Connecting
                | ConnectionState::Reconnecting => return Ok(()),
                ConnectionState::Terminal => {
                    return Err(RelayError::connection("client is terminal"))
                }
                ConnectionState::Idle | ConnectionState::Disconnected => {
                    *state = ConnectionState::Connecting;
                }
            }
        }
        connect_with_retry(&self.inner).await
    }

    /// Close the push channel and fail all in-flight requests
    ///
    /// Inhibits auto-reconnect; the client cannot be attached again.
    pub async fn disconnect(&self) {
        self.inner.terminal.store(true, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        *self.inner.state.lock().await = ConnectionState::Terminal;

        if let Some(listener) = self.inner.listener.lock().await.take() {
            listener.abort();
        }

        fail_pending(&self.inner, "client disconnected").await;
        self.inner.observers.emit(&ClientEvent::Disconnect);
        info!(session_id = %self.inner.session_id, "peer client disconnected");
    }

    /// Install a dispatch-table entry for one method
    ///
    /// When a tool descriptor accompanies the handler, the same body is
    /// also reachable through `tools/call` and listed in the catalogue.
    pub async fn register_handler<F, Fut>(
        &self,
        method: impl Into<String>,
        handler: F,
        descriptor: Option<ToolDescriptor>,
    ) where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RelayResult<Value>> + Send + 'static,
    {
        let method = method.into();
        let handler: MethodHandler = Arc::new(move |params| {
            Box::pin(handler(params)) as BoxFuture<'static, RelayResult<Value>>
        });

        if let Some(descriptor) = descriptor {
            let as_executor = Arc::clone(&handler);
            let executor: ToolExecutor =
                Arc::new(move |arguments| as_executor(Value::Object(arguments)));
            self.install_tool(descriptor, executor).await;
        }

        self.inner.handlers.lock().await.insert(method, handler);
    }

    /// Register a named tool: descriptor plus executor body
    pub async fn register_tool<F, Fut>(&self, descriptor: ToolDescriptor, executor: F)
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RelayResult<Value>> + Send + 'static,
    {
        let executor: ToolExecutor = Arc::new(move |arguments| {
            Box::pin(executor(arguments)) as BoxFuture<'static, RelayResult<Value>>
        });
        self.install_tool(descriptor, executor).await;
    }

    pub(crate) async fn install_tool(&self, descriptor: ToolDescriptor, executor: ToolExecutor) {
        let name = descriptor.name.clone();
        {
            let mut tools = self.inner.tools.lock().await;
            tools.retain(|tool| tool.name != name);
            tools.push(descriptor);
        }
        self.inner.executors.lock().await.insert(name, executor);
    }

    /// Publish the tool catalogue to the relay
    ///
    /// Sends `tools/register` carrying the explicit descriptor set, or
    /// everything registered so far when `tools` is `None`.
    ///
    /// # Errors
    ///
    /// Propagates transport failures and relay-side error responses.
    pub async fn register_tools(&self, tools: Option<Vec<ToolDescriptor>>) -> RelayResult<()> {
        let tools = match tools {
            Some(tools) => tools,
            None => self.inner.tools.lock().await.clone(),
        };
        let response = self
            .request("tools/register", Some(json!({ "tools": tools })))
            .await?;
        match response.error {
            Some(error) => Err(RelayError::from_json_rpc_error(&error)),
            None => Ok(()),
        }
    }

    /// Send a request and await its correlated response
    ///
    /// Allocates a local id, records the pending entry, POSTs the
    /// request, and resolves when the matching response arrives on the
    /// push channel.
    ///
    /// # Errors
    ///
    /// Kind `Connection` when not attached or the channel drops while the
    /// request is in flight; kind `Timeout` after `connection_timeout_ms`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> RelayResult<JsonRpcResponse> {
        if *self.inner.state.lock().await != ConnectionState::Connected {
            return Err(RelayError::connection("push channel is not connected"));
        }

        let id = self.inner.ids.next_id();
        let key = id_key(&id);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(key.clone(), tx);

        let request = JsonRpcRequest::new(id, method, params);
        if let Err(error) = post_json(&self.inner, &serde_json::to_value(&request)?).await {
            self.inner.pending.lock().await.remove(&key);
            return Err(error);
        }

        let deadline = Duration::from_millis(self.inner.config.connection_timeout_ms);
        match timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RelayError::connection("push channel closed mid-request")),
            Err(_) => {
                self.inner.pending.lock().await.remove(&key);
                Err(RelayError::timeout(format!(
                    "Request {method} timed out after {}ms",
                    deadline.as_millis()
                )))
            }
        }
    }

    /// Send a fire-and-forget notification
    ///
    /// # Errors
    ///
    /// Kind `Connection` when the POST is rejected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> RelayResult<()> {
        let notification = JsonRpcNotification::new(method, params);
        post_json(&self.inner, &serde_json::to_value(&notification)?).await
    }

    /// Join a target session, retargeting subsequent POSTs at it
    ///
    /// Returns the target's tool snapshot from the join response.
    ///
    /// # Errors
    ///
    /// Kind `Session` when the target does not exist.
    pub async fn join_session(&self, target: &str) -> RelayResult<Vec<ToolDescriptor>> {
        let response = self
            .request("session/join", Some(json!({ "sessionId": target })))
            .await?;

        if let Some(error) = response.error {
            return Err(RelayError::from_json_rpc_error(&error));
        }

        *self.inner.post_session.lock().await = target.to_owned();

        let tools = response
            .result
            .as_ref()
            .and_then(|result| result.get("tools"))
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        Ok(tools)
    }

    /// Discover the joined session's tool catalogue
    ///
    /// # Errors
    ///
    /// Propagates transport failures and relay-side error responses.
    pub async fn list_tools(&self) -> RelayResult<Vec<ToolDescriptor>> {
        let response = self.request("tools/list", None).await?;
        if let Some(error) = response.error {
            return Err(RelayError::from_json_rpc_error(&error));
        }
        let tools = response
            .result
            .as_ref()
            .and_then(|result| result.get("tools"))
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        Ok(tools)
    }

    /// Invoke a named tool on the joined session's provider
    ///
    /// A failed tool run still resolves `Ok`: the result carries
    /// `is_error` and the failure text, mirroring the wire shape.
    ///
    /// # Errors
    ///
    /// Transport and relay-side failures that produced no result payload.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> RelayResult<ToolResult> {
        let response = self
            .request(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments.unwrap_or_default() })),
            )
            .await?;

        if let Some(result) = response.result {
            return Ok(serde_json::from_value(result)?);
        }
        match response.error {
            Some(error) => Err(RelayError::from_json_rpc_error(&error)),
            None => Err(RelayError::internal("response carried neither result nor error")),
        }
    }

    /// Round-trip liveness probe answered by the relay
    ///
    /// # Errors
    ///
    /// Propagates transport failures and relay-side error responses.
    pub async fn ping(&self) -> RelayResult<Value> {
        let response = self.request("ping", None).await?;
        if let Some(error) = response.error {
            return Err(RelayError::from_json_rpc_error(&error));
        }
        response
            .result
            .ok_or_else(|| RelayError::internal("ping response carried no result"))
    }

}

/// Attach attempt loop with exponential backoff
async fn connect_with_retry(inner: &Arc<ClientInner>) -> RelayResult<()> {
    let max_attempts = if inner.config.auto_reconnect {
        inner.config.max_reconnect_attempts.max(1)
    } else {
        1
    };

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match try_connect(inner).await {
            Ok(()) => {
                *inner.state.lock().await = ConnectionState::Connected;
                let peer_id = inner.peer_id.lock().await.clone().unwrap_or_default();
                inner.observers.emit(&ClientEvent::Connect {
                    peer_id,
                    session_id: inner.session_id.clone(),
                });
                info!(session_id = %inner.session_id, attempt, "push channel connected");
                return Ok(());
            }
            Err(error) => {
                warn!(
                    session_id = %inner.session_id,
                    attempt,
                    error = %error,
                    "attach attempt failed"
                );
                if attempt >= max_attempts || inner.terminal.load(Ordering::SeqCst) {
                    *inner.state.lock().await = ConnectionState::Terminal;
                    inner.observers.emit(&ClientEvent::Error(error.clone()));
                    return Err(error);
                }
                *inner.state.lock().await = ConnectionState::Reconnecting;
                let delay = inner.config.reconnect_base_delay_ms << (attempt - 1);
                sleep(Duration::from_millis(delay)).await;
                *inner.state.lock().await = ConnectionState::Connecting;
            }
        }
    }
}

/// One attach attempt: open the SSE stream and await the `connected` frame
fn try_connect(inner: &Arc<ClientInner>) -> BoxFuture<'_, RelayResult<()>> {
    Box::pin(try_connect_impl(inner))
}

async fn try_connect_impl(inner: &Arc<ClientInner>) -> RelayResult<()> {
    let url = format!("{}/events", inner.config.server_url.trim_end_matches('/'));
    let deadline = Duration::from_millis(inner.config.connection_timeout_ms);

    let response = timeout(
        deadline,
        inner
            .http
            .get(&url)
            .query(&[
                ("sessionId", inner.session_id.as_str()),
                ("role", inner.role.as_str()),
            ])
            .send(),
    )
    .await
    .map_err(|_| RelayError::timeout("push channel open timed out"))??;

    if !response.status().is_success() {
        return Err(RelayError::connection(format!(
            "attach rejected with status {}",
            response.status()
        )));
    }

    let (connected_tx, connected_rx) = oneshot::channel();
    *inner.connected_signal.lock().await = Some(connected_tx);

    let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let stream = response.bytes_stream();
    let listener_inner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        listen(listener_inner, stream, generation).await;
    });
    *inner.listener.lock().await = Some(handle);

    let (peer_id, session_id) = timeout(deadline, connected_rx)
        .await
        .map_err(|_| RelayError::timeout("timed out waiting for connected notification"))?
        .map_err(|_| RelayError::connection("push channel closed before connected notification"))?;

    debug!(peer_id = %peer_id, session_id = %session_id, "connected notification received");
    *inner.peer_id.lock().await = Some(peer_id);
    Ok(())
}

/// Drain the push channel, dispatching each frame in arrival order
async fn listen(
    inner: Arc<ClientInner>,
    stream: impl futures_util::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    generation: u64,
) {
    let mut stream = Box::pin(stream);
    let mut parser = SseLineBuffer::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                for payload in parser.feed(&bytes) {
                    dispatch::handle_frame(&inner, &payload).await;
                }
            }
            Err(error) => {
                debug!(error = %error, "push channel read error");
                break;
            }
        }
    }
    if let Some(payload) = parser.flush() {
        dispatch::handle_frame(&inner, &payload).await;
    }

    // A newer connection may have superseded this listener.
    if inner.generation.load(Ordering::SeqCst) != generation {
        return;
    }
    on_stream_closed(&inner).await;
}

/// Transport close after open: fail in-flight requests, maybe reconnect
async fn on_stream_closed(inner: &Arc<ClientInner>) {
    if inner.terminal.load(Ordering::SeqCst) {
        *inner.state.lock().await = ConnectionState::Terminal;
        return;
    }

    *inner.state.lock().await = ConnectionState::Disconnected;
    fail_pending(inner, "push channel closed").await;
    inner.observers.emit(&ClientEvent::Disconnect);
    info!(session_id = %inner.session_id, "push channel closed");

    if inner.config.auto_reconnect {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            *inner.state.lock().await = ConnectionState::Connecting;
            if let Err(error) = connect_with_retry(&inner).await {
                warn!(error = %error, "reconnect abandoned");
            }
        });
    } else {
        *inner.state.lock().await = ConnectionState::Terminal;
    }
}

/// Fail every pending local with a connection error
async fn fail_pending(inner: &Arc<ClientInner>, reason: &str) {
    let drained: Vec<_> = inner.pending.lock().await.drain().collect();
    for (_, sender) in drained {
        let _ = sender.send(Err(RelayError::connection(reason)));
    }
}

/// POST one message at the relay's ingest endpoint
pub(crate) async fn post_json(inner: &Arc<ClientInner>, body: &Value) -> RelayResult<()> {
    let url = format!("{}/message", inner.config.server_url.trim_end_matches('/'));
    let session_id = inner.post_session.lock().await.clone();
    let peer_id = inner.peer_id.lock().await.clone();

    let mut query: Vec<(&str, String)> = vec![("sessionId", session_id)];
    if let Some(peer_id) = peer_id {
        query.push(("peerId", peer_id));
    }

    let response = inner
        .http
        .post(&url)
        .query(&query)
        .timeout(Duration::from_millis(inner.config.connection_timeout_ms))
        .json(body)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(RelayError::connection(format!(
            "ingest rejected with status {}",
            response.status()
        )));
    }
    Ok(())
}
