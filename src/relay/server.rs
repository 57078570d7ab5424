// ABOUTME: HTTP surface of the relay: SSE attach, message ingest, and probes
// ABOUTME: Provides the axum router with CORS, body limits, and keep-alive streaming
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

//! Relay HTTP endpoints
//!
//! Four endpoint shapes on HTTP/1.1:
//!
//! - `GET /events?sessionId=<s>&role=<provider|caller>` — long-lived SSE
//!   push channel, `data: <json>` frames, `:keepalive` comment heartbeats.
//! - `POST /message?sessionId=<s>[&peerId=<p>]` — single-message ingest,
//!   acknowledged with `{"success":true}` before semantic processing.
//! - `GET /health` — status, session/peer counts, uptime.
//! - `GET /sessions` — discovery listing.
//!
//! All responses carry permissive CORS headers; `OPTIONS` answers 204.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::errors::{RelayError, RelayResult};
use crate::jsonrpc::Message;
use crate::relay::health::HealthState;
use crate::relay::router::process_message;
use crate::relay::session::{PeerRole, SessionManager};

/// Largest accepted ingest body
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// The relay server: configuration plus shared state
pub struct RelayServer {
    config: RelayConfig,
    manager: Arc<SessionManager>,
    health: Arc<HealthState>,
}

#[derive(Clone)]
struct AppState {
    manager: Arc<SessionManager>,
    health: Arc<HealthState>,
    keep_alive: Duration,
}

impl RelayServer {
    /// Create a relay server from configuration
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        let manager = Arc::new(SessionManager::new(config.request_timeout_ms));
        Self {
            config,
            manager,
            health: Arc::new(HealthState::new()),
        }
    }

    /// Shared session manager handle (test observability)
    #[must_use]
    pub fn manager(&self) -> Arc<SessionManager> {
        Arc::clone(&self.manager)
    }

    /// Build the axum router with all endpoints and layers
    #[must_use]
    pub fn router(&self) -> Router {
        let state = AppState {
            manager: Arc::clone(&self.manager),
            health: Arc::clone(&self.health),
            keep_alive: Duration::from_millis(self.config.keep_alive_ms),
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/events", get(attach_events).options(preflight))
            .route("/message", post(ingest_message).options(preflight))
            .route("/health", get(health_probe).options(preflight))
            .route("/sessions", get(list_sessions).options(preflight))
            .layer(DefaultBodyLimit::max(MAX_MESSAGE_BYTES))
            .layer(cors)
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown
    ///
    /// # Errors
    ///
    /// Returns kind `Connection` when the listen address cannot be bound.
    pub async fn serve(self) -> RelayResult<()> {
        let address = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|e| RelayError::connection(format!("Failed to bind {address}: {e}")))?;
        info!(address = %address, "relay listening");

        let app = self.router();
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayError::connection(format!("Server error: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "peerId")]
    peer_id: Option<String>,
}

/// Ends the push channel's relay-side state when the SSE stream drops
///
/// TCP close is observed as the stream future being dropped; cleanup has
/// to go through the session manager's lock, so it is spawned.
struct DisconnectGuard {
    manager: Arc<SessionManager>,
    peer_id: String,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let manager = Arc::clone(&self.manager);
        let peer_id = std::mem::take(&mut self.peer_id);
        tokio::spawn(async move {
            manager.disconnect(&peer_id).await;
        });
    }
}

/// `GET /events` — attach a peer push channel
async fn attach_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, RelayError> {
    let session_id = query
        .session_id
        .ok_or_else(|| RelayError::validation("Missing sessionId parameter"))?;
    let role = query
        .role
        .as_deref()
        .map(PeerRole::parse)
        .transpose()?
        .ok_or_else(|| RelayError::validation("Missing role parameter"))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let peer_id = state.manager.attach(&session_id, role, tx).await;
    let guard = DisconnectGuard {
        manager: Arc::clone(&state.manager),
        peer_id,
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(frame) = rx.recv().await {
            yield Ok::<_, Infallible>(Event::default().data(frame));
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.keep_alive)
            .text("keepalive"),
    ))
}

/// `POST /message` — single-message ingest
///
/// Shape violations (missing sessionId, non-JSON body, non-2.0 value)
/// answer 400 synchronously; everything semantic is acknowledged first
/// and processed asynchronously, with results flowing down push channels.
async fn ingest_message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Result<Json<Value>, RelayError> {
    let session_id = query
        .session_id
        .ok_or_else(|| RelayError::validation("Missing sessionId parameter"))?;
    let message = Message::parse(&body)?;

    debug!(
        session_id = %session_id,
        method = message.method().unwrap_or("<response>"),
        "message accepted"
    );

    let manager = Arc::clone(&state.manager);
    tokio::spawn(async move {
        process_message(&manager, &session_id, query.peer_id.as_deref(), message).await;
    });

    Ok(Json(json!({ "success": true })))
}

/// `GET /health`
async fn health_probe(State(state): State<AppState>) -> Json<Value> {
    let (sessions, peers) = state.manager.counts().await;
    let snapshot = state.health.snapshot(sessions, peers);
    Json(json!(snapshot))
}

/// `GET /sessions`
async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.manager.list_sessions().await;
    Json(json!({ "sessions": sessions }))
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}
