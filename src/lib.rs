// ABOUTME: Main library entry point for the Switchboard tool-call relay
// ABOUTME: Exposes the relay server, peer multiplexer, and shared protocol types
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

#![deny(unsafe_code)]

//! # Switchboard
//!
//! A tool-call relay brokering bidirectional request/response traffic
//! between two classes of peers over plain HTTP: *providers* (long-lived
//! clients exposing a catalogue of callable tools, typically executed
//! inside a browser) and *callers* (short-lived clients that discover and
//! invoke those tools, typically AI agents). Peers never address each
//! other; they meet in named sessions and the relay is the sole
//! intermediary.
//!
//! ## Architecture
//!
//! - **Relay** ([`relay`]): accepts peer connections, owns sessions,
//!   routes messages with id rewriting, enforces forward timeouts.
//! - **Framing & protocol** ([`jsonrpc`], [`schema`], [`errors`]): the
//!   JSON-RPC 2.0 message set, tool/content schema, and the
//!   kind-discriminated error taxonomy.
//! - **Peer multiplexer** ([`client`]): library used by both roles —
//!   opens the push channel, posts outbound messages, correlates
//!   responses with in-flight requests, dispatches inbound requests to a
//!   table of named handlers.
//! - **Browser toolset** ([`browser`]): the driver seam and built-in
//!   tool descriptors a provider publishes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use switchboard::config::RelayConfig;
//! use switchboard::relay::RelayServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RelayConfig::from_env()?;
//!     RelayServer::new(config).serve().await?;
//!     Ok(())
//! }
//! ```

/// Browser driver seam and the built-in provider toolset
pub mod browser;

/// Peer-side request/response multiplexer
pub mod client;

/// Environment-driven configuration for relay and peers
pub mod config;

/// Kind-discriminated error taxonomy with stable wire codes
pub mod errors;

/// JSON-RPC 2.0 message set and classification
pub mod jsonrpc;

/// Structured logging setup
pub mod logging;

/// The relay: sessions, routing, HTTP surface
pub mod relay;

/// Tool descriptor and content schema types
pub mod schema;
