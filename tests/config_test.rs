// ABOUTME: Tests for relay and peer configuration surfaces
// ABOUTME: Validates defaults, builders, and session id auto-generation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use switchboard::config::{PeerConfig, RelayConfig};

#[test]
fn test_relay_defaults() {
    let config = RelayConfig::default();
    assert_eq!(config.port, 8765);
    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.keep_alive_ms, 30_000);
    assert_eq!(config.request_timeout_ms, 30_000);
    assert!(!config.debug);
}

#[test]
fn test_relay_summary_mentions_address() {
    let config = RelayConfig::default();
    let summary = config.summary();
    assert!(summary.contains("0.0.0.0:8765"));
}

#[test]
fn test_peer_defaults() {
    let config = PeerConfig::new("http://localhost:8765");
    assert!(config.auto_reconnect);
    assert_eq!(config.reconnect_base_delay_ms, 1_000);
    assert_eq!(config.max_reconnect_attempts, 5);
    assert_eq!(config.connection_timeout_ms, 30_000);
    assert!(config.session_id.is_none());
    assert!(!config.debug);
}

#[test]
fn test_peer_builders() {
    let config = PeerConfig::new("http://localhost:8765")
        .with_session_id("fixed")
        .with_auto_reconnect(false)
        .with_connection_timeout_ms(250);
    assert_eq!(config.session_id.as_deref(), Some("fixed"));
    assert!(!config.auto_reconnect);
    assert_eq!(config.connection_timeout_ms, 250);
}

#[test]
fn test_session_id_resolution() {
    let fixed = PeerConfig::new("http://localhost:8765").with_session_id("fixed");
    assert_eq!(fixed.resolve_session_id(), "fixed");

    let auto = PeerConfig::new("http://localhost:8765");
    let first = auto.resolve_session_id();
    let second = auto.resolve_session_id();
    assert!(first.starts_with("session-"));
    // Auto-generated ids are fresh per resolution
    assert_ne!(first, second);
}

#[test]
fn test_relay_from_env_rejects_garbage() {
    // Scoped to a variable no other test touches
    std::env::set_var("SWITCHBOARD_REQUEST_TIMEOUT_MS", "not-a-number");
    let result = RelayConfig::from_env();
    std::env::remove_var("SWITCHBOARD_REQUEST_TIMEOUT_MS");
    let error = result.unwrap_err();
    assert_eq!(error.kind, switchboard::errors::ErrorKind::Validation);
}
