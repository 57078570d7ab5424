// ABOUTME: Environment configuration management for relay and peer deployments
// ABOUTME: Provides enumerated option surfaces with env-var loading and validated fallbacks
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

//! Environment-based configuration for the relay server and peer clients
//!
//! Both surfaces are small and enumerated: the relay takes its listen
//! address, keep-alive cadence, and forward timeout; peers take the relay
//! URL, their session id, and reconnect behavior. Every option has a
//! default suitable for a trusted LAN/localhost deployment.

use std::env;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{RelayError, RelayResult};

/// Default relay listen port
pub const DEFAULT_PORT: u16 = 8765;
/// Default push-channel keep-alive interval in milliseconds
pub const DEFAULT_KEEP_ALIVE_MS: u64 = 30_000;
/// Default forward/request timeout in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Default reconnect base delay in milliseconds
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1_000;
/// Default maximum reconnect attempts
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Default connection timeout in milliseconds
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Listen port
    pub port: u16,
    /// Listen host
    pub host: String,
    /// Push-channel keep-alive interval in milliseconds
    pub keep_alive_ms: u64,
    /// Forward timeout for rewritten caller requests in milliseconds
    pub request_timeout_ms: u64,
    /// Verbose logging on/off
    pub debug: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: "0.0.0.0".to_owned(),
            keep_alive_ms: DEFAULT_KEEP_ALIVE_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            debug: false,
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables
    ///
    /// Recognized variables: `SWITCHBOARD_PORT`, `SWITCHBOARD_HOST`,
    /// `SWITCHBOARD_KEEP_ALIVE_MS`, `SWITCHBOARD_REQUEST_TIMEOUT_MS`,
    /// `SWITCHBOARD_DEBUG`. Unset variables fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns kind `Validation` when a set variable fails to parse.
    pub fn from_env() -> RelayResult<Self> {
        let defaults = Self::default();

        Ok(Self {
            port: parse_env("SWITCHBOARD_PORT", defaults.port)?,
            host: env::var("SWITCHBOARD_HOST").unwrap_or(defaults.host),
            keep_alive_ms: parse_env("SWITCHBOARD_KEEP_ALIVE_MS", defaults.keep_alive_ms)?,
            request_timeout_ms: parse_env(
                "SWITCHBOARD_REQUEST_TIMEOUT_MS",
                defaults.request_timeout_ms,
            )?,
            debug: parse_bool_env("SWITCHBOARD_DEBUG", defaults.debug),
        })
    }

    /// One-line summary for startup logging
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "listen={}:{} keep_alive_ms={} request_timeout_ms={} debug={}",
            self.host, self.port, self.keep_alive_ms, self.request_timeout_ms, self.debug
        )
    }
}

/// Peer client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Relay base URL, e.g. `http://127.0.0.1:8765`
    pub server_url: String,
    /// Session id; auto-generated when absent
    pub session_id: Option<String>,
    /// Re-attach the push channel after it drops
    pub auto_reconnect: bool,
    /// Base delay for exponential reconnect backoff in milliseconds
    pub reconnect_base_delay_ms: u64,
    /// Maximum attach attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Timeout for connection establishment and outbound requests in milliseconds
    pub connection_timeout_ms: u64,
    /// Verbose logging on/off
    pub debug: bool,
}

impl PeerConfig {
    /// Create a configuration with defaults for the given relay URL
    #[must_use]
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            session_id: None,
            auto_reconnect: true,
            reconnect_base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            debug: false,
        }
    }

    /// Set a fixed session id
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Enable or disable automatic reconnect
    #[must_use]
    pub const fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    /// Override the connection/request timeout
    #[must_use]
    pub const fn with_connection_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connection_timeout_ms = timeout_ms;
        self
    }

    /// Resolve the session id, generating one when absent
    #[must_use]
    pub fn resolve_session_id(&self) -> String {
        self.session_id
            .clone()
            .unwrap_or_else(|| format!("session-{}", Uuid::new_v4()))
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> RelayResult<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| RelayError::validation(format!("Invalid value for {name}: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn parse_bool_env(name: &str, default: bool) -> bool {
    env::var(name).map_or(default, |v| {
        matches!(v.as_str(), "1" | "true" | "yes" | "on")
    })
}
