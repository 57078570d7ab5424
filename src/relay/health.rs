// ABOUTME: Relay health probe state and response payload
// ABOUTME: Tracks process start time and reports session/peer counts with uptime
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

use std::time::Instant;

use serde::Serialize;

/// Health probe response payload
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall service status
    pub status: &'static str,
    /// Number of live sessions
    pub sessions: usize,
    /// Number of attached peers
    pub peers: usize,
    /// Seconds since the relay started
    #[serde(rename = "uptimeSeconds")]
    pub uptime_seconds: f64,
}

/// Process start-time tracking for the health probe
#[derive(Debug)]
pub struct HealthState {
    start_time: Instant,
}

impl HealthState {
    /// Create state anchored at the current instant
    #[must_use]
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    /// Build the probe payload for the given counts
    #[must_use]
    pub fn snapshot(&self, sessions: usize, peers: usize) -> HealthResponse {
        HealthResponse {
            status: "ok",
            sessions,
            peers,
            uptime_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
