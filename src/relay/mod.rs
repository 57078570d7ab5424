// ABOUTME: Relay-side module grouping: sessions, routing, HTTP surface, health
// ABOUTME: Re-exports the server entry point and the session manager
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

//! The relay: session owner, message router, and HTTP surface
//!
//! Peers never address each other; they attach a push channel under a
//! session id and POST messages at the relay, which forwards them with
//! rewritten ids and returns responses over the originating caller's
//! channel.

/// Health probe state and payload
pub mod health;

/// Routing matrix applied to ingested messages
pub mod router;

/// Session registry, peers, and the pending-route table
pub mod session;

/// HTTP endpoints: SSE attach, ingest, probes
pub mod server;

pub use server::RelayServer;
pub use session::{PeerRole, SessionManager};
